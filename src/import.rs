use crate::config::SharepointConfig;
use crate::error::{ImportError, RuleError};
use crate::rules::{AttachmentPattern, Condition, Delivery, Pattern, RuleSet, RuleStore};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use std::io::Cursor;

/// A spreadsheet found in the import folder.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub name: String,
    /// Where `download` fetches the bytes from.
    pub location: String,
}

/// Folder of rule spreadsheets.
pub trait RuleImportSource {
    /// Files directly inside `folder`, a `/`-separated path whose first
    /// segment names the document library itself.
    fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>, ImportError>;
    fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, ImportError>;
}

/// Authenticates a Sharepoint account and opens its document library.
pub trait ImportConnector {
    fn connect(
        &self,
        account: &SharepointConfig,
        secret: &str,
    ) -> Result<Box<dyn RuleImportSource>, ImportError>;
}

/// Column order of the rule sheet.
const COL_NAME: usize = 0;
const COL_SENDER: usize = 1;
const COL_SUBJECT: usize = 2;
const COL_BODY: usize = 3;
const COL_FILENAME: usize = 4;
const COL_RECIPIENTS: usize = 5;
const COL_FORWARD_BODY: usize = 6;

/// Load the account's rules and append every condition the import source
/// yields. Import failures are logged and the rules assembled so far are
/// returned.
pub fn load_with_import(
    store: &RuleStore,
    account_name: &str,
    source: Option<(&dyn RuleImportSource, &str)>,
    sheet_name: &str,
) -> Result<RuleSet, RuleError> {
    let mut rules = store.load(account_name)?;

    if let Some((source, folder)) = source {
        match import_into(&mut rules, source, folder, sheet_name) {
            Ok(count) => log_info!(
                "[Import] Appended {} imported condition(s) for '{}'",
                count,
                account_name
            ),
            Err(e) => log_error!(
                "[Import] Import for '{}' stopped, continuing with {} condition(s): {}",
                account_name,
                rules.conditions.len(),
                e
            ),
        }
        for name in rules.duplicate_names() {
            log_warn!(
                "[Rules] Condition name '{}' appears more than once for '{}'",
                name,
                account_name
            );
        }
    }

    Ok(rules)
}

/// Append conditions from every `.xlsx` file in `folder`. Files are
/// appended one at a time, so a failure keeps what earlier files added.
pub fn import_into(
    rules: &mut RuleSet,
    source: &dyn RuleImportSource,
    folder: &str,
    sheet_name: &str,
) -> Result<usize, ImportError> {
    import_with(rules, source, folder, |bytes| read_sheet(bytes, sheet_name))
}

fn import_with<F>(
    rules: &mut RuleSet,
    source: &dyn RuleImportSource,
    folder: &str,
    read_rows: F,
) -> Result<usize, ImportError>
where
    F: Fn(&[u8]) -> Result<Vec<Vec<String>>, String>,
{
    let files = source.list_files(folder)?;
    log_debug!("[Import] {} file(s) in '{}'", files.len(), folder);

    let mut total = 0;
    for file in files.iter().filter(|f| is_rule_workbook(&f.name)) {
        let bytes = source.download(file)?;
        let rows = read_rows(&bytes).map_err(|reason| ImportError::Malformed {
            file: file.name.clone(),
            reason,
        })?;
        let conditions = conditions_from_rows(rows.iter().skip(1).map(|r| r.as_slice()));
        log_info!(
            "[Import] {} condition(s) from '{}'",
            conditions.len(),
            file.name
        );
        total += conditions.len();
        rules.append(conditions);
    }
    Ok(total)
}

/// `.xlsx` files, ignoring Office lock files (`~$name.xlsx`).
fn is_rule_workbook(name: &str) -> bool {
    name.to_lowercase().ends_with(".xlsx") && !name.starts_with("~$")
}

/// All rows of `sheet_name` as strings, positioned so that index 0 is the
/// first worksheet row and column.
pub fn read_sheet(bytes: &[u8], sheet_name: &str) -> Result<Vec<Vec<String>>, String> {
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(bytes)).map_err(|e| format!("not an xlsx workbook: {}", e))?;
    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| format!("sheet '{}': {}", sheet_name, e))?;

    let (start_row, start_col) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return Ok(Vec::new()),
    };

    let mut rows = vec![Vec::new(); start_row];
    for row in range.rows() {
        let mut cells = vec![String::new(); start_col];
        cells.extend(row.iter().map(cell_text));
        rows.push(cells);
    }
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// One forwarding condition per data row. Rows without a name are skipped.
pub fn conditions_from_rows<'r, I>(rows: I) -> Vec<Condition>
where
    I: IntoIterator<Item = &'r [String]>,
{
    let mut conditions = Vec::new();
    for row in rows {
        let name = cell_at(row, COL_NAME);
        if name.is_empty() {
            continue;
        }

        let filenames = split_multi(cell_at(row, COL_FILENAME));
        if filenames.len() > 1 {
            log_warn!(
                "[Import] Condition '{}' lists {} filename entries; only '{}' is used",
                name,
                filenames.len(),
                filenames[0]
            );
        }
        let pattern = Pattern {
            sender: non_empty(cell_at(row, COL_SENDER)),
            subject: non_empty_list(split_multi(cell_at(row, COL_SUBJECT))),
            body: non_empty_list(split_multi(cell_at(row, COL_BODY))),
            attachments: if filenames.is_empty() {
                None
            } else {
                Some(
                    filenames
                        .into_iter()
                        .map(|f| AttachmentPattern { filename: vec![f] })
                        .collect(),
                )
            },
        };

        let recipients = split_multi(cell_at(row, COL_RECIPIENTS));
        if recipients.is_empty() {
            log_warn!("[Import] Condition '{}' has no forward recipients", name);
        }

        conditions.push(Condition {
            name: name.to_string(),
            pattern,
            delivery: Some(Delivery::email_forward(
                recipients,
                non_empty(cell_at(row, COL_FORWARD_BODY)),
            )),
        });
    }
    conditions
}

/// Split a multi-value cell on `|` and newlines. Entries are trimmed, and
/// empty entries and repeats are dropped.
pub fn split_multi(cell: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for part in cell.split(|c| c == '|' || c == '\n' || c == '\r') {
        let part = part.trim();
        if !part.is_empty() && !values.iter().any(|v| v == part) {
            values.push(part.to_string());
        }
    }
    values
}

fn cell_at(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn non_empty_list(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::evaluate;
    use crate::message::Attachment;
    use crate::rules::{Target, DEFAULT_RULES_FILE};
    use std::fs;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    /// Serves pre-parsed rows keyed by file name; a workbook named in
    /// `broken` fails to download.
    struct FakeSource {
        files: Vec<RemoteFile>,
        broken: Option<String>,
        fail_listing: bool,
    }

    impl RuleImportSource for FakeSource {
        fn list_files(&self, _folder: &str) -> Result<Vec<RemoteFile>, ImportError> {
            if self.fail_listing {
                return Err(ImportError::Source("site not found".to_string()));
            }
            Ok(self.files.clone())
        }

        fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, ImportError> {
            if self.broken.as_deref() == Some(file.name.as_str()) {
                return Err(ImportError::Source(format!("download of {} failed", file.name)));
            }
            Ok(b"not a workbook".to_vec())
        }
    }

    fn remote(name: &str) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            location: format!("https://files.example/{}", name),
        }
    }

    #[test]
    fn test_split_multi() {
        assert_eq!(
            split_multi(" Invoice | Statement\nRemittance||invoice |Invoice"),
            vec!["Invoice", "Statement", "Remittance", "invoice"]
        );
        assert!(split_multi("").is_empty());
        assert!(split_multi(" | \n ").is_empty());
        assert_eq!(split_multi("a\r\nb"), vec!["a", "b"]);
    }

    #[test]
    fn test_row_becomes_forward_condition() {
        let rows = vec![row(&[
            "Supplier invoices",
            "billing@supplier.com",
            "Invoice|Bill",
            "",
            "invoice\n.pdf",
            "ap@contoso.com|finance@contoso.com",
            "Forwarded by mailroute",
        ])];
        let conditions = conditions_from_rows(rows.iter().map(|r| r.as_slice()));
        assert_eq!(conditions.len(), 1);

        let c = &conditions[0];
        assert_eq!(c.name, "Supplier invoices");
        assert_eq!(c.pattern.sender.as_deref(), Some("billing@supplier.com"));
        assert_eq!(c.pattern.subject.as_ref().unwrap(), &vec!["Invoice", "Bill"]);
        assert!(c.pattern.body.is_none());
        let attachments = c.pattern.attachments.as_ref().unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename, vec!["invoice"]);
        assert_eq!(attachments[1].filename, vec![".pdf"]);

        let d = c.delivery.as_ref().unwrap();
        assert_eq!(d.target, Target::EmailForward);
        assert_eq!(d.recipients.as_ref().unwrap().len(), 2);
        assert_eq!(d.body.as_deref(), Some("Forwarded by mailroute"));
    }

    #[test]
    fn test_filename_entries_match_on_the_first_one() {
        let rows = vec![row(&["Invoices or statements", "", "", "", "invoice|statement"])];
        let conditions = conditions_from_rows(rows.iter().map(|r| r.as_slice()));

        let mut msg = crate::message::test_message("m1", "a@b.com", "", "");
        msg.has_attachments = true;
        msg.attachments = vec![Attachment {
            name: "invoice.pdf".to_string(),
            content: Vec::new(),
        }];
        assert!(evaluate(&msg, &conditions[0]).matched);

        msg.attachments[0].name = "statement.pdf".to_string();
        assert!(!evaluate(&msg, &conditions[0]).matched);
    }

    #[test]
    fn test_empty_cells_leave_clauses_unset() {
        let rows = vec![row(&["Only subject", "", "Statement"])];
        let conditions = conditions_from_rows(rows.iter().map(|r| r.as_slice()));
        let p = &conditions[0].pattern;
        assert!(p.sender.is_none());
        assert!(p.body.is_none());
        assert!(p.attachments.is_none());
        assert!(conditions[0].delivery.as_ref().unwrap().body.is_none());
    }

    #[test]
    fn test_rows_without_name_are_skipped() {
        let rows = vec![row(&["", "a@b.com"]), row(&["  "]), row(&["kept", "x@y.com"])];
        let conditions = conditions_from_rows(rows.iter().map(|r| r.as_slice()));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].name, "kept");
    }

    #[test]
    fn test_rule_workbook_filter() {
        assert!(is_rule_workbook("Rules.XLSX"));
        assert!(!is_rule_workbook("~$Rules.xlsx"));
        assert!(!is_rule_workbook("rules.csv"));
    }

    #[test]
    fn test_read_sheet_rejects_garbage() {
        assert!(read_sheet(b"not a zip", "Email Rules").is_err());
    }

    #[test]
    fn test_import_failure_keeps_existing_conditions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(DEFAULT_RULES_FILE),
            r#"{"conditions": [{"name": "local", "pattern": {"sender": "a@b.com"}}]}"#,
        )
        .unwrap();
        let store = RuleStore::new(dir.path());

        let source = FakeSource {
            files: vec![remote("notes.txt"), remote("rules.xlsx")],
            broken: None,
            fail_listing: false,
        };
        let dyn_source: &dyn RuleImportSource = &source;
        let rules =
            load_with_import(&store, "ap", Some((dyn_source, "Documents/Rules")), "Email Rules").unwrap();
        assert_eq!(rules.conditions.len(), 1);
        assert_eq!(rules.conditions[0].name, "local");

        let source = FakeSource {
            files: Vec::new(),
            broken: None,
            fail_listing: true,
        };
        let dyn_source: &dyn RuleImportSource = &source;
        let rules =
            load_with_import(&store, "ap", Some((dyn_source, "Documents/Rules")), "Email Rules").unwrap();
        assert_eq!(rules.conditions.len(), 1);
    }

    #[test]
    fn test_download_failure_is_reported() {
        let source = FakeSource {
            files: vec![remote("a.xlsx")],
            broken: Some("a.xlsx".to_string()),
            fail_listing: false,
        };
        let mut rules = RuleSet::default();
        let result = import_into(&mut rules, &source, "Documents", "Email Rules");
        assert!(matches!(result, Err(ImportError::Source(_))));
        assert!(rules.conditions.is_empty());
    }

    #[test]
    fn test_non_workbooks_are_not_downloaded() {
        let source = FakeSource {
            files: vec![remote("readme.docx")],
            broken: Some("readme.docx".to_string()),
            fail_listing: false,
        };
        let mut rules = RuleSet::default();
        assert_eq!(import_into(&mut rules, &source, "Documents", "Email Rules").unwrap(), 0);
    }

    /// Rows as `;`-separated lines, so files can be told apart without
    /// building real workbooks.
    fn text_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        if text == "not a workbook" {
            return Err("not an xlsx workbook".to_string());
        }
        Ok(text.lines().map(|l| l.split(';').map(str::to_string).collect()).collect())
    }

    struct TextSource(Vec<(&'static str, &'static str)>);

    impl RuleImportSource for TextSource {
        fn list_files(&self, _folder: &str) -> Result<Vec<RemoteFile>, ImportError> {
            Ok(self.0.iter().map(|(name, _)| remote(name)).collect())
        }

        fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, ImportError> {
            self.0
                .iter()
                .find(|(name, _)| *name == file.name)
                .map(|(_, body)| body.as_bytes().to_vec())
                .ok_or_else(|| ImportError::Source("gone".to_string()))
        }
    }

    #[test]
    fn test_failed_file_keeps_earlier_imports() {
        let source = TextSource(vec![
            ("a.xlsx", "Name;Sender\nfirst;a@b.com\nsecond;c@d.com"),
            ("b.xlsx", "not a workbook"),
            ("c.xlsx", "Name;Sender\nnever;e@f.com"),
        ]);
        let mut rules = RuleSet::default();
        let result = import_with(&mut rules, &source, "Documents", text_rows);

        match result {
            Err(ImportError::Malformed { file, .. }) => assert_eq!(file, "b.xlsx"),
            other => panic!("expected malformed b.xlsx, got {:?}", other),
        }
        let names: Vec<&str> = rules.conditions.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_header_row_is_skipped() {
        let source = TextSource(vec![("a.xlsx", "Name;Sender\nonly;a@b.com")]);
        let mut rules = RuleSet::default();
        assert_eq!(import_with(&mut rules, &source, "Documents", text_rows).unwrap(), 1);
        assert_eq!(rules.conditions[0].name, "only");
    }

    fn workbook(sheet: &str, origin: (u32, u16), rows: &[&[&str]]) -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet).unwrap();
        for (r, cells) in rows.iter().enumerate() {
            for (c, text) in cells.iter().enumerate() {
                if !text.is_empty() {
                    worksheet
                        .write_string(origin.0 + r as u32, origin.1 + c as u16, *text)
                        .unwrap();
                }
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    /// Serves real workbooks by file name.
    struct WorkbookSource(Vec<(&'static str, Vec<u8>)>);

    impl RuleImportSource for WorkbookSource {
        fn list_files(&self, _folder: &str) -> Result<Vec<RemoteFile>, ImportError> {
            Ok(self.0.iter().map(|(name, _)| remote(name)).collect())
        }

        fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, ImportError> {
            self.0
                .iter()
                .find(|(name, _)| *name == file.name)
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| ImportError::Source("gone".to_string()))
        }
    }

    const HEADER: &[&str] = &[
        "Name",
        "Sender",
        "Subject",
        "Body",
        "Attachment",
        "Forward to",
        "Forward body",
    ];

    #[test]
    fn test_read_sheet_positions_cells_from_the_sheet_origin() {
        let bytes = workbook("Email Rules", (1, 1), &[&["hdr", ""], &["", "val"]]);
        let rows = read_sheet(&bytes, "Email Rules").unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_empty());
        assert_eq!(rows[1][1], "hdr");
        assert_eq!(rows[2][0], "");
        assert_eq!(rows[2][2], "val");
    }

    #[test]
    fn test_read_sheet_requires_named_sheet() {
        let bytes = workbook("Sheet1", (0, 0), &[HEADER]);
        let err = read_sheet(&bytes, "Email Rules").unwrap_err();
        assert!(err.contains("Email Rules"), "got: {}", err);
    }

    #[test]
    fn test_workbook_rows_become_conditions() {
        let bytes = workbook(
            "Email Rules",
            (0, 0),
            &[
                HEADER,
                &[
                    "Remittances",
                    "payments@bank.com",
                    "Remittance|Payment advice",
                    "",
                    "remit",
                    "ar@contoso.com",
                    "",
                ],
                &["", "ignored@x.com"],
            ],
        );
        let source = WorkbookSource(vec![("Rules.xlsx", bytes)]);
        let mut rules = RuleSet::default();

        assert_eq!(import_into(&mut rules, &source, "Documents/Rules", "Email Rules").unwrap(), 1);
        let c = &rules.conditions[0];
        assert_eq!(c.name, "Remittances");
        assert_eq!(c.pattern.sender.as_deref(), Some("payments@bank.com"));
        assert_eq!(c.pattern.subject.as_ref().unwrap(), &vec!["Remittance", "Payment advice"]);
        assert_eq!(c.pattern.attachments.as_ref().unwrap()[0].filename, vec!["remit"]);
        assert_eq!(
            c.delivery.as_ref().unwrap().recipients.as_ref().unwrap(),
            &vec!["ar@contoso.com"]
        );
    }

    #[test]
    fn test_imports_follow_account_specific_rules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("ap_email_rules.json"),
            r#"{"conditions": [
                {"name": "ap local one", "pattern": {"sender": "a@b.com"}},
                {"name": "ap local two", "pattern": {"subject": ["statement"]}}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join(DEFAULT_RULES_FILE),
            r#"{"conditions": [{"name": "default only", "pattern": {"sender": "z@z.com"}}]}"#,
        )
        .unwrap();
        let store = RuleStore::new(dir.path());

        let source = WorkbookSource(vec![
            (
                "a.xlsx",
                workbook("Email Rules", (0, 0), &[HEADER, &["imported one", "x@y.com"]]),
            ),
            (
                "b.xlsx",
                workbook("Email Rules", (0, 0), &[HEADER, &["imported two", "", "Invoice"]]),
            ),
        ]);
        let dyn_source: &dyn RuleImportSource = &source;
        let rules =
            load_with_import(&store, "ap", Some((dyn_source, "Documents/Rules")), "Email Rules").unwrap();

        let names: Vec<&str> = rules.conditions.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ap local one", "ap local two", "imported one", "imported two"]
        );
    }

    #[test]
    fn test_missing_rule_file_is_fatal_even_with_import() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path());
        let source = FakeSource {
            files: Vec::new(),
            broken: None,
            fail_listing: false,
        };
        let dyn_source: &dyn RuleImportSource = &source;
        assert!(matches!(
            load_with_import(&store, "ap", Some((dyn_source, "Documents")), "Email Rules"),
            Err(RuleError::ConfigNotFound { .. })
        ));
    }
}

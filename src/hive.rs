// Hive 查询：暂存查询文件并拼接 beeline 命令
use crate::utils::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

pub const QUERY_SUFFIXES: [&str; 2] = ["sql", "hql"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveOptions {
    /// Local file to download the query result into.
    pub output_filename: Option<PathBuf>,
    pub remove_blank_top_line: bool,
}

impl Default for HiveOptions {
    fn default() -> Self {
        HiveOptions {
            output_filename: None,
            remove_blank_top_line: true,
        }
    }
}

/// A query names a file when it ends in `.sql` or `.hql`.
pub fn is_query_file(query: &str) -> bool {
    Path::new(query.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| QUERY_SUFFIXES.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Writes the query (or a copy of the named query file) to a local temp file.
pub fn stage_query(query: &str) -> Result<NamedTempFile> {
    let mut staged = tempfile::Builder::new()
        .prefix("issho_")
        .suffix(".sql")
        .tempfile()?;
    if is_query_file(query) {
        let mut source = std::fs::File::open(query.trim())?;
        std::io::copy(&mut source, staged.as_file_mut())?;
    } else {
        staged.write_all(query.as_bytes())?;
    }
    staged.flush()?;
    Ok(staged)
}

/// Remote scratch paths for one query run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFiles {
    pub query: String,
    pub output: String,
}

impl RemoteFiles {
    pub fn new() -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self::with_stamp(stamp)
    }

    pub fn with_stamp(stamp: u128) -> Self {
        RemoteFiles {
            query: format!("/tmp/issho_{}.sql", stamp),
            output: format!("/tmp/issho_{}.out", stamp),
        }
    }
}

impl Default for RemoteFiles {
    fn default() -> Self {
        Self::new()
    }
}

pub fn beeline_command(opts: &str, jdbc: &str, query_file: &str, output: Option<&str>) -> String {
    let mut command = format!("beeline {} -u \"{}\" -f {}", opts, jdbc, quote(query_file));
    if let Some(output) = output {
        command.push_str(&format!(" > {}", quote(output)));
    }
    command
}

pub fn strip_blank_top_line_command(path: &str) -> String {
    format!("sed -i '1{{/^[[:space:]]*$/d}}' {}", quote(path))
}

pub fn cleanup_command(files: &RemoteFiles) -> String {
    format!("rm -f {} {}", quote(&files.query), quote(&files.output))
}

/// Single-quotes `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_query_files() {
        assert!(is_query_file("report.sql"));
        assert!(is_query_file("queries/daily.HQL"));
        assert!(!is_query_file("select * from t"));
        assert!(!is_query_file("select 'x.sql' as name from t limit 1;"));
    }

    #[test]
    fn inline_query_is_written_verbatim() {
        let query = "select count(*)\nfrom events\nwhere ds = '2024-01-01';";
        let staged = stage_query(query).unwrap();
        assert_eq!(std::fs::read_to_string(staged.path()).unwrap(), query);
    }

    #[test]
    fn query_file_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("daily.hql");
        std::fs::write(&source, "show tables;").unwrap();

        let staged = stage_query(source.to_str().unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(staged.path()).unwrap(), "show tables;");
    }

    #[test]
    fn builds_beeline_command() {
        let files = RemoteFiles::with_stamp(42);
        assert_eq!(files.query, "/tmp/issho_42.sql");
        assert_eq!(
            beeline_command("--silent=true", "jdbc:hive2://h:10000", &files.query, None),
            "beeline --silent=true -u \"jdbc:hive2://h:10000\" -f '/tmp/issho_42.sql'"
        );
        assert!(beeline_command("", "j", &files.query, Some(&files.output))
            .ends_with("> '/tmp/issho_42.out'"));
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(
            strip_blank_top_line_command("/tmp/o"),
            "sed -i '1{/^[[:space:]]*$/d}' '/tmp/o'"
        );
    }
}

// File Commands
// GITHUB_ENV, GITHUB_PATH and GITHUB_OUTPUT files written by run steps

use serde_json::{Map, Value};

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The per-step files a script appends to
#[derive(Debug, Clone)]
pub struct FileCommands {
    env_file: PathBuf,
    path_file: PathBuf,
    output_file: PathBuf,
}

/// What a step asked to pass on to later steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileCommandResults {
    /// Variables exported to every later step
    pub env: Vec<(String, String)>,
    /// Directories prepended to PATH, most recent first
    pub paths: Vec<String>,
    /// `steps.<id>.outputs`
    pub outputs: Map<String, Value>,
}

impl FileCommands {
    /// Create empty command files for one step under `dir`
    pub fn create(dir: &Path, step_index: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let commands = Self {
            env_file: dir.join(format!("env_{}", step_index)),
            path_file: dir.join(format!("path_{}", step_index)),
            output_file: dir.join(format!("output_{}", step_index)),
        };
        for file in [&commands.env_file, &commands.path_file, &commands.output_file] {
            fs::write(file, "")?;
        }
        Ok(commands)
    }

    /// Environment variables pointing the script at the command files
    pub fn env_vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("GITHUB_ENV".to_string(), self.env_file.display().to_string()),
            ("GITHUB_PATH".to_string(), self.path_file.display().to_string()),
            ("GITHUB_OUTPUT".to_string(), self.output_file.display().to_string()),
        ])
    }

    /// Read back whatever the step wrote
    pub fn collect(&self) -> io::Result<FileCommandResults> {
        let env = parse_key_values(&fs::read_to_string(&self.env_file)?);

        let mut paths: Vec<String> = fs::read_to_string(&self.path_file)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        paths.reverse();

        let outputs = parse_key_values(&fs::read_to_string(&self.output_file)?)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        Ok(FileCommandResults {
            env,
            paths,
            outputs,
        })
    }
}

/// Parse `NAME=value` lines and `NAME<<DELIM` heredoc blocks
pub fn parse_key_values(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        // A line is a heredoc start only when `<<` comes before any `=`
        let heredoc = match (line.find("<<"), line.find('=')) {
            (Some(open), Some(eq)) => open < eq,
            (Some(_), None) => true,
            _ => false,
        };

        if let Some((name, delimiter)) = line.split_once("<<").filter(|_| heredoc) {
            let delimiter = delimiter.trim();
            let mut value = Vec::new();
            for body in lines.by_ref() {
                if body == delimiter {
                    break;
                }
                value.push(body);
            }
            pairs.push((name.trim().to_string(), value.join("\n")));
        } else if let Some((name, value)) = line.split_once('=') {
            pairs.push((name.trim().to_string(), value.to_string()));
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_pairs() {
        let pairs = parse_key_values("CARGO_TERM_COLOR=always\n\nRUSTFLAGS=-D warnings\n");
        assert_eq!(
            pairs,
            vec![
                ("CARGO_TERM_COLOR".to_string(), "always".to_string()),
                ("RUSTFLAGS".to_string(), "-D warnings".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_heredoc() {
        let content = "NOTES<<EOF\nline one\nline two\nEOF\nSIZE=4096\n";
        let pairs = parse_key_values(content);
        assert_eq!(pairs[0], ("NOTES".to_string(), "line one\nline two".to_string()));
        assert_eq!(pairs[1], ("SIZE".to_string(), "4096".to_string()));
    }

    #[test]
    fn test_assignment_value_may_contain_heredoc_marker() {
        let pairs = parse_key_values("MSG=a<<b\nPROFILE=release\n");
        assert_eq!(
            pairs,
            vec![
                ("MSG".to_string(), "a<<b".to_string()),
                ("PROFILE".to_string(), "release".to_string()),
            ]
        );
    }

    #[test]
    fn test_collect_written_commands() {
        let dir = tempfile::tempdir().unwrap();
        let commands = FileCommands::create(dir.path(), 2).unwrap();
        let vars = commands.env_vars();

        fs::write(&vars["GITHUB_ENV"], "FIRMWARE=blinky\n").unwrap();
        fs::write(&vars["GITHUB_PATH"], "/opt/arm/bin\n/opt/openocd/bin\n").unwrap();
        fs::write(&vars["GITHUB_OUTPUT"], "size=1024\n").unwrap();

        let results = commands.collect().unwrap();
        assert_eq!(
            results.env,
            vec![("FIRMWARE".to_string(), "blinky".to_string())]
        );
        assert_eq!(results.paths, vec!["/opt/openocd/bin", "/opt/arm/bin"]);
        assert_eq!(results.outputs["size"], Value::String("1024".to_string()));
    }

    #[test]
    fn test_untouched_files_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let commands = FileCommands::create(dir.path(), 0).unwrap();
        assert_eq!(commands.collect().unwrap(), FileCommandResults::default());
    }
}

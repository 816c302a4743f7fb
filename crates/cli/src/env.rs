use crate::error::CliError;
use std::{collections::HashMap, fs, path::Path};

/// Process environment overlaid with `KEY=VALUE` files given on the
/// command line. Later files win over earlier ones and over the process.
#[derive(Debug, Clone, Default)]
pub struct EnvManager {
    vars: HashMap<String, String>,
}

impl EnvManager {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CliError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read env file {}: {e}", path.display()))
        })?;

        self.parse_env_content(&content)
            .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.vars
    }

    fn parse_env_content(&mut self, content: &str) -> Result<(), String> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let Some((key, value)) = line.split_once('=') else {
                return Err(format!(
                    "malformed line {} (expected KEY=VALUE)",
                    line_num + 1
                ));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("empty key at line {}", line_num + 1));
            }

            self.vars.insert(key.to_string(), unquote(value.trim()));
        }
        Ok(())
    }
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

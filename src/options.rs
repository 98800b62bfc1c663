//! `--key=value` / `--switch` option parsing for the audit subcommands.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Options {
    pub positional: Vec<String>,
    values: BTreeMap<String, String>,
    switches: BTreeSet<String>,
}

impl Options {
    /// Split `args` into positionals, `--key=value` options named in
    /// `valued`, and bare `--switch` flags named in `switches`.
    pub fn parse(args: &[String], valued: &[&str], switches: &[&str]) -> Result<Self> {
        let mut options = Self::default();
        for arg in args {
            let Some(option) = arg.strip_prefix("--") else {
                options.positional.push(arg.clone());
                continue;
            };
            match option.split_once('=') {
                Some((key, value)) if valued.contains(&key) => {
                    if value.is_empty() {
                        bail!("option '--{}' needs a value", key);
                    }
                    options.values.insert(key.to_string(), value.to_string());
                }
                None if switches.contains(&option) => {
                    options.switches.insert(option.to_string());
                }
                None if valued.contains(&option) => bail!("option '--{}' needs a value", option),
                _ => bail!("unknown option '{}'", arg),
            }
        }
        Ok(options)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn switch(&self, key: &str) -> bool {
        self.switches.contains(key)
    }

    /// Exactly `N` positionals, or `bail!` with `usage`.
    pub fn positionals<const N: usize>(&self, usage: &str) -> Result<[&str; N]> {
        let refs: Vec<&str> = self.positional.iter().map(String::as_str).collect();
        match <[&str; N]>::try_from(refs) {
            Ok(array) => Ok(array),
            Err(_) => bail!("{}", usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_mixed() {
        let options = Options::parse(
            &args(&["a.so", "--suppressions=s.txt", "--annotate", "out.abi"]),
            &["suppressions", "timeout"],
            &["annotate"],
        )
        .unwrap();

        assert_eq!(options.positionals::<2>("usage").unwrap(), ["a.so", "out.abi"]);
        assert_eq!(options.value("suppressions"), Some("s.txt"));
        assert_eq!(options.value("timeout"), None);
        assert!(options.switch("annotate"));
        assert!(options.positionals::<1>("usage: one").is_err());
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert!(Options::parse(&args(&["--bogus=1"]), &["relro"], &[]).is_err());
        assert!(Options::parse(&args(&["--relro"]), &["relro"], &[]).is_err());
        assert!(Options::parse(&args(&["--relro="]), &["relro"], &[]).is_err());
        assert!(Options::parse(&args(&["--annotate=yes"]), &[], &["annotate"]).is_err());
    }
}

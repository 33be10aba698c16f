//! Structured Dokku command builder.
//!
//! Commands are assembled from typed arguments and rendered once. The host
//! only re-parses quotes for `config*` commands; those get POSIX single-quote
//! escaping for anything outside a conservative safe set. Every other command
//! is split on whitespace on the host, so its arguments are sent verbatim and
//! must be single shell words. Arguments can be marked secret so the runner
//! can redact them.

use std::borrow::Cow;

use crate::error::ConfigError;

/// Marker substituted for secret values in logs and captured output.
pub const REDACTION_MARKER: &str = "*******";

/// A single command to run against the Dokku host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DokkuCommand {
    /// Subcommand, e.g. `apps:create`.
    subcommand: String,
    /// Positional and flag arguments in order.
    args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    /// Raw argument text.
    value: String,
    /// Part of the argument that must never be logged.
    secret: Option<String>,
}

impl DokkuCommand {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(subcommand: impl Into<String>) -> Self {
        Self {
            subcommand: subcommand.into(),
            args: Vec::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: None,
        });
        self
    }

    /// Appends several positional arguments.
    #[must_use]
    pub fn args<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        values.into_iter().fold(self, Self::arg)
    }

    /// Appends `--name value`.
    #[must_use]
    pub fn flag(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(format!("--{name}")).arg(value)
    }

    /// Appends `--name value` when the value is present and non-blank.
    #[must_use]
    pub fn flag_opt(self, name: &str, value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => self.flag(name, v),
            None => self,
        }
    }

    /// Appends `--name value` with the value redacted in logs.
    #[must_use]
    pub fn secret_flag(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self = self.arg(format!("--{name}"));
            self.args.push(Arg {
                value: v.to_string(),
                secret: Some(v.to_string()),
            });
        }
        self
    }

    /// Appends a `KEY=value` assignment with the value redacted in logs.
    #[must_use]
    pub fn assignment(mut self, key: &str, value: &str) -> Self {
        self.args.push(Arg {
            value: format!("{key}={value}"),
            secret: Some(value.to_string()),
        });
        self
    }

    /// Returns the subcommand.
    #[must_use]
    pub fn subcommand(&self) -> &str {
        &self.subcommand
    }

    /// Returns the values that must be redacted.
    #[must_use]
    pub fn secrets(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter_map(|a| a.secret.as_deref())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns true if the host re-parses quoting for this command.
    fn host_parses_quotes(&self) -> bool {
        self.subcommand.starts_with("config")
    }

    /// Checks that every argument reaches the host as written.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first argument of a non-`config`
    /// command that is empty or contains whitespace, quotes, backslashes or
    /// glob characters. Secret arguments are redacted in the message.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.host_parses_quotes() {
            return Ok(());
        }
        match self.args.iter().find(|a| !is_word(&a.value)) {
            None => Ok(()),
            Some(arg) => {
                let shown = arg
                    .secret
                    .as_deref()
                    .map_or_else(|| arg.value.clone(), |s| redact(&arg.value, &[s]));
                Err(ConfigError::ValidationError {
                    message: format!(
                        "`{}` cannot pass '{shown}': arguments must be single words \
                         without quotes or glob characters",
                        self.subcommand
                    ),
                    field: None,
                })
            }
        }
    }

    /// Renders the full command line as sent to the host.
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = self.subcommand.clone();
        for arg in &self.args {
            line.push(' ');
            if self.host_parses_quotes() {
                line.push_str(&quote(&arg.value));
            } else {
                line.push_str(&arg.value);
            }
        }
        line
    }

    /// Renders the command line with secrets replaced.
    #[must_use]
    pub fn redacted(&self) -> String {
        redact(&self.render(), &self.secrets())
    }
}

impl std::fmt::Display for DokkuCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// Quotes an argument for the remote shell when needed.
#[must_use]
pub fn quote(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() {
        return Cow::Borrowed("''");
    }
    if arg.chars().all(is_safe_char) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", escape_single_quotes(arg)))
}

/// Replaces every occurrence of each secret, raw or shell-escaped.
#[must_use]
pub fn redact(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, REDACTION_MARKER);
        let escaped = escape_single_quotes(secret);
        if escaped != *secret {
            out = out.replace(&escaped, REDACTION_MARKER);
        }
    }
    out
}

/// Returns true if the argument survives plain whitespace splitting on the
/// host unchanged.
#[must_use]
pub fn is_word(arg: &str) -> bool {
    !arg.is_empty()
        && arg.chars().all(|c| {
            !c.is_whitespace()
                && !c.is_control()
                && !matches!(c, '\'' | '"' | '\\' | '`' | '*' | '?' | '[' | ']')
        })
}

fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', r"'\''")
}

const fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let cmd = DokkuCommand::new("apps:create").arg("web");
        assert_eq!(cmd.render(), "apps:create web");
    }

    #[test]
    fn test_quote_whitespace_and_quotes() {
        assert_eq!(quote("FOO=BAR BAZ"), "'FOO=BAR BAZ'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("https://x.io/a:b"), "https://x.io/a:b");
    }

    #[test]
    fn test_assignment_redacted() {
        let cmd = DokkuCommand::new("config:set")
            .arg("web")
            .assignment("TOKEN", "s3cr3t value");
        assert_eq!(cmd.render(), "config:set web 'TOKEN=s3cr3t value'");
        assert_eq!(cmd.redacted(), "config:set web 'TOKEN=*******'");
    }

    #[test]
    fn test_redact_escaped_secret() {
        let cmd = DokkuCommand::new("config:set").arg("web").assignment("Q", "a'b c");
        assert!(!cmd.redacted().contains("a'b"));
        assert!(!cmd.redacted().contains(r"a'\''b"));
    }

    #[test]
    fn test_optional_flags_skip_blank() {
        let cmd = DokkuCommand::new("postgres:create")
            .arg("db")
            .flag_opt("image", Some("postgres"))
            .flag_opt("image-version", Some(" "))
            .secret_flag("password", None);
        assert_eq!(cmd.render(), "postgres:create db --image postgres");
        assert!(cmd.secrets().is_empty());
    }

    #[test]
    fn test_non_config_arguments_are_sent_verbatim() {
        let cmd = DokkuCommand::new("postgres:link")
            .args(["db", "web"])
            .flag("querystring", "sslmode=require&pool=5");
        assert_eq!(cmd.render(), "postgres:link db web --querystring sslmode=require&pool=5");
        assert!(cmd.check().is_ok());

        let buildpack = DokkuCommand::new("buildpacks:add")
            .arg("web")
            .arg("https://github.com/heroku/heroku-buildpack-ruby.git#v250");
        assert!(buildpack.render().ends_with(".git#v250"));
        assert!(buildpack.check().is_ok());
    }

    #[test]
    fn test_non_config_argument_with_space_is_rejected() {
        let cmd = DokkuCommand::new("domains:set").args(["web", "a.example.com b"]);
        let err = cmd.check().unwrap_err();
        assert!(err.to_string().contains("a.example.com b"));

        assert!(DokkuCommand::new("apps:create").arg("").check().is_err());
        assert!(DokkuCommand::new("redis:create").arg("it's").check().is_err());
    }

    #[test]
    fn test_rejected_secret_is_redacted() {
        let cmd = DokkuCommand::new("postgres:create")
            .arg("db")
            .secret_flag("password", Some("two words"));
        let err = cmd.check().unwrap_err().to_string();
        assert!(!err.contains("two words"));
        assert!(err.contains(REDACTION_MARKER));
    }

    #[test]
    fn test_config_commands_skip_word_check() {
        let cmd = DokkuCommand::new("config:set").arg("web").assignment("A", "x y");
        assert!(cmd.check().is_ok());
    }

    #[test]
    fn test_redact_ignores_empty_secret() {
        assert_eq!(redact("abc", &[""]), "abc");
    }
}

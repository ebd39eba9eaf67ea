use serde::{Deserialize, Deserializer};
use lettre_email::Mailbox;

/// Mail system configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Email address to send submission notices as.
    #[serde(deserialize_with = "de_mailbox")]
    pub sender: Mailbox,
    /// Archive operator's address. Replies go here, and so do copies of
    /// failed-submission notices.
    #[serde(default, deserialize_with = "de_opt_mailbox")]
    pub operator: Option<Mailbox>,
    /// Tag prepended to every subject line.
    #[serde(default)]
    pub subject_prefix: Option<String>,
    /// Transport method to use, and its configuration.
    #[serde(flatten)]
    pub transport: Transports,
}

/// Mail transport configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Transports {
    /// Log messages to standard error.
    Log,
    /// Use the `sendmail(1)` command.
    Sendmail,
}

fn de_mailbox<'de, D>(d: D) -> std::result::Result<Mailbox, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_str(MailboxVisitor)
}

fn de_opt_mailbox<'de, D>(d: D) -> std::result::Result<Option<Mailbox>, D::Error>
where
    D: Deserializer<'de>,
{
    de_mailbox(d).map(Some)
}

struct MailboxVisitor;

impl<'de> serde::de::Visitor<'de> for MailboxVisitor {
    type Value = Mailbox;

    fn expecting(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "an email address")
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Mailbox, E>
    where
        E: serde::de::Error,
    {
        use serde::de::Unexpected;

        v.parse()
            .map_err(|_| E::invalid_value(Unexpected::Str(v), &"an email address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_sections_parse_with_and_without_an_operator() {
        let config: Config = toml::from_str(r#"
            sender = "curator@example.org"
            operator = "archive@example.org"
            subject_prefix = "[curator]"
            transport = "log"
        "#).unwrap();

        assert!(config.operator.is_some());
        assert_eq!(config.subject_prefix.as_deref(), Some("[curator]"));

        let config: Config = toml::from_str(r#"
            sender = "curator@example.org"
            transport = "log"
        "#).unwrap();

        assert!(config.operator.is_none());
        assert!(config.subject_prefix.is_none());
    }
}

use actix::{Actor, Context, Handler, Supervised, SystemService};
use lettre_email::Mailbox;

use super::transport::{self, Message, Transport};

pub struct Mailer {
    transport: Box<dyn Transport>,
    subject_prefix: Option<String>,
}

impl Mailer {
    /// Try to send an email message.
    ///
    /// Errors will be logged, but otherwise ignored.
    pub fn send<M, S, T>(to: M, subject: S, text: T)
    where
        M: Into<Mailbox>,
        S: Into<String>,
        T: Into<String>,
    {
        let mailer = Mailer::from_registry();
        let message = Message {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
        };

        if let Err(err) = mailer.try_send(message) {
            error!("Could not send mail: {}", err);
        }
    }
}

impl Default for Mailer {
    fn default() -> Self {
        let config = crate::config::load()
            .expect("Configuration should be ready when mailer is started");

        let transport = transport::from_config(&config.mail);

        Self {
            transport,
            subject_prefix: config.mail.subject_prefix.clone(),
        }
    }
}

impl Actor for Mailer {
    type Context = Context<Self>;
}

impl Supervised for Mailer {
}

impl SystemService for Mailer {
}

impl actix::Message for Message {
    type Result = ();
}

impl Handler<Message> for Mailer {
    type Result = ();

    fn handle(&mut self, mut msg: Message, _: &mut Self::Context) {
        msg.subject = prefixed(self.subject_prefix.as_deref(), &msg.subject);

        match self.transport.send(msg) {
            Ok(()) => (),
            Err(err) => {
                error!("Could not send email: {}", err);
            }
        }
    }
}

/// Prepend the configured subject tag, if any.
fn prefixed(prefix: Option<&str>, subject: &str) -> String {
    match prefix {
        Some(prefix) => format!("{} {}", prefix, subject),
        None => subject.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::prefixed;

    #[test]
    fn subjects_carry_the_configured_tag() {
        assert_eq!(
            prefixed(Some("[curator]"), "Submission archived"),
            "[curator] Submission archived");
        assert_eq!(prefixed(None, "Submission archived"),
            "Submission archived");
    }
}

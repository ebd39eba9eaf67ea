use failure::Error;
use lettre::sendmail::SendmailTransport;
use lettre_email::{EmailBuilder, Mailbox};

use super::config::{Config, Transports};

pub fn from_config(config: &Config) -> Box<dyn Transport> {
    match config.transport {
        Transports::Log => Box::new(Logger),
        Transports::Sendmail => Box::new(
            Lettre::new(config, SendmailTransport::new())),
    }
}

pub struct Message {
    pub to: Mailbox,
    pub subject: String,
    pub text: String,
}

/// An object-safe version of [`lettre::Transport`].
pub trait Transport {
    fn send(&mut self, message: Message) -> Result<(), Error>;
}

impl Message {
    pub fn into_lettre(self) -> EmailBuilder {
        EmailBuilder::new()
            .to(self.to)
            .subject(self.subject)
            .text(self.text)
    }
}

/// Mail transport which does nothing except logging sent messages.
struct Logger;

impl Transport for Logger {
    fn send(&mut self, message: Message) -> Result<(), Error> {
        debug!("Message:\nTo: {}\nSubject: {}\n\n{}",
            message.to, message.subject, message.text);
        Ok(())
    }
}

/// Type implementing [`Transport`] for a wrapped [`lettre::Transport`].
struct Lettre<T> {
    sender: Mailbox,
    /// Replies to submission notices go to the operator, not the
    /// unattended sender address.
    reply_to: Option<Mailbox>,
    transport: T,
}

impl<T> Lettre<T> {
    fn new(config: &Config, inner: T) -> Self {
        Self {
            sender: config.sender.clone(),
            reply_to: config.operator.clone(),
            transport: inner,
        }
    }
}

impl<T, E> Transport for Lettre<T>
where
    T: for<'a> lettre::Transport<'a, Result = Result<(), E>>,
    Error: From<E>,
{
    fn send(&mut self, message: Message) -> Result<(), Error> {
        let mut mail = message.into_lettre()
            .from(self.sender.clone());

        if let Some(ref reply_to) = self.reply_to {
            mail = mail.reply_to(reply_to.clone());
        }

        let mail = mail.build()?.into();

        self.transport.send(mail).map_err(From::from)
    }
}

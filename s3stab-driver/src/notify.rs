//! Email status reports for long-running test plans.
//!
//! [`MailNotifier`] runs on its own thread. It sends an "in progress" mail right away and then
//! once per interval, until the run is finished with [`MailNotifier::send_passed`] or
//! [`MailNotifier::send_failed`]. All mails after the first reply to it, so mail clients show one
//! thread per run.
//!
//! Mail delivery failures are logged and never affect the run.

use std::fmt;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};

use crate::config;

/// The state of a run as reported in a mail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionStatus {
    /// The run is still going.
    InProgress,
    /// All tests completed successfully.
    Passed,
    /// A test failed and the run was aborted.
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InProgress => "in progress",
            Self::Passed => "passed",
            Self::Failed => "failed",
        })
    }
}

/// A rendered status mail.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusMail {
    /// The subject line.
    pub subject: String,
    /// HTML body.
    pub body: String,
    /// Set on the first mail of a run.
    pub message_id: Option<String>,
    /// Set on every follow-up, pointing at the first mail.
    pub in_reply_to: Option<String>,
}

/// Delivers status mails.
pub trait Mailer: Send + 'static {
    /// Sends one mail.
    fn send(&mut self, mail: &StatusMail) -> Result<()>;
}

/// A [`Mailer`] that relays through a plain SMTP server.
pub struct SmtpMailer {
    transport: SmtpTransport,
    sender: Mailbox,
    receivers: Vec<Mailbox>,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("sender", &self.sender)
            .field("receivers", &self.receivers)
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    /// Creates a mailer from the mail configuration.
    ///
    /// Fails if the host, sender or receivers are missing or invalid.
    pub fn new(config: &config::Mail) -> Result<Self> {
        let host = config.host.as_deref().context("no mail host configured")?;
        let sender = config
            .sender
            .as_deref()
            .context("no mail sender configured")?
            .parse()
            .context("invalid sender address")?;
        let receivers = config
            .receivers()
            .map(|receiver| {
                receiver
                    .parse()
                    .with_context(|| format!("invalid receiver address {receiver}"))
            })
            .collect::<Result<Vec<Mailbox>>>()?;
        anyhow::ensure!(!receivers.is_empty(), "no mail receivers configured");

        let transport = SmtpTransport::builder_dangerous(host)
            .port(config.port)
            .build();

        Ok(Self {
            transport,
            sender,
            receivers,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(&mut self, mail: &StatusMail) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(mail.subject.as_str())
            .date_now()
            .header(ContentType::TEXT_HTML);
        for receiver in &self.receivers {
            builder = builder.to(receiver.clone());
        }
        if let Some(message_id) = &mail.message_id {
            builder = builder.message_id(Some(message_id.clone()));
        }
        if let Some(parent) = &mail.in_reply_to {
            builder = builder
                .in_reply_to(parent.clone())
                .references(parent.clone());
        }

        let message = builder.body(mail.body.clone())?;
        self.transport.send(&message)?;
        Ok(())
    }
}

/// Details shown in every mail of a run.
#[derive(Clone, Debug, Default)]
pub struct MailContext {
    /// Identifier of the test plan.
    pub test_plan: Option<String>,
    /// The S3 endpoint under test.
    pub endpoint: String,
    /// Link to the CI job running the plan.
    pub build_url: Option<String>,
}

struct MailThread<M> {
    mailer: M,
    context: MailContext,
    started: Instant,
    message_id: Option<String>,
}

impl<M: Mailer> MailThread<M> {
    fn prepare(&mut self, status: ExecutionStatus) -> StatusMail {
        let headline = match &self.context.test_plan {
            Some(test_plan) => format!(
                "S3 stability test plan {test_plan} is {status} on {}",
                self.context.endpoint
            ),
            None => format!(
                "S3 stability test plan is {status} on {}",
                self.context.endpoint
            ),
        };

        let elapsed = Duration::from_secs(self.started.elapsed().as_secs());
        let mut body = format!(
            "<h3>{headline}.</h3>\n<p>Elapsed: {}</p>\n",
            humantime::format_duration(elapsed)
        );
        if let Some(build_url) = &self.context.build_url {
            body.push_str(&format!(
                "Visit CI job: <a href=\"{build_url}\">{build_url}</a>\n"
            ));
        }

        let (message_id, in_reply_to) = match &self.message_id {
            None => {
                let id = format!("<{}@s3stab>", uuid::Uuid::new_v4());
                self.message_id = Some(id.clone());
                (Some(id), None)
            }
            Some(parent) => (None, Some(parent.clone())),
        };

        StatusMail {
            subject: headline,
            body,
            message_id,
            in_reply_to,
        }
    }

    fn send(&mut self, status: ExecutionStatus) {
        let mail = self.prepare(status);
        tracing::info!(subject = %mail.subject, "sending mail");
        if let Err(error) = self.mailer.send(&mail) {
            tracing::warn!(error = ?error, "failed to send status mail");
        }
    }

    fn run(mut self, interval: Duration, status: mpsc::Receiver<ExecutionStatus>) {
        loop {
            self.send(ExecutionStatus::InProgress);
            match status.recv_timeout(interval) {
                Ok(ExecutionStatus::InProgress) | Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Ok(final_status) => return self.send(final_status),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return self.send(ExecutionStatus::Failed);
                }
            }
        }
    }
}

/// Handle to the background mail thread.
///
/// Dropping the handle without reporting a verdict makes the thread send a "failed" mail.
#[derive(Debug)]
pub struct MailNotifier {
    status: mpsc::Sender<ExecutionStatus>,
    handle: JoinHandle<()>,
}

impl MailNotifier {
    /// Spawns the mail thread, which sends the first "in progress" mail immediately.
    pub fn start<M: Mailer>(mailer: M, context: MailContext, interval: Duration) -> Result<Self> {
        let (status, receiver) = mpsc::channel();
        let thread = MailThread {
            mailer,
            context,
            started: Instant::now(),
            message_id: None,
        };

        let handle = thread::Builder::new()
            .name("mail-notifier".into())
            .spawn(move || thread.run(interval, receiver))
            .context("failed to spawn mail notifier")?;

        Ok(Self { status, handle })
    }

    /// Sends the final "passed" mail and waits for the thread to exit.
    pub fn send_passed(self) {
        self.finish(ExecutionStatus::Passed)
    }

    /// Sends the final "failed" mail and waits for the thread to exit.
    pub fn send_failed(self) {
        self.finish(ExecutionStatus::Failed)
    }

    fn finish(self, status: ExecutionStatus) {
        // The thread only exits after receiving a verdict, so this cannot fail while it runs.
        self.status.send(status).ok();
        if self.handle.join().is_err() {
            tracing::error!("mail notifier thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingMailer {
        mails: Arc<Mutex<Vec<StatusMail>>>,
        fail: bool,
    }

    impl Mailer for RecordingMailer {
        fn send(&mut self, mail: &StatusMail) -> Result<()> {
            self.mails.lock().unwrap().push(mail.clone());
            anyhow::ensure!(!self.fail, "connection refused");
            Ok(())
        }
    }

    fn context() -> MailContext {
        MailContext {
            test_plan: Some("TP-1".into()),
            endpoint: "https://s3.local".into(),
            build_url: Some("https://ci.local/job/1".into()),
        }
    }

    #[test]
    fn progress_then_threaded_verdict() {
        let mailer = RecordingMailer::default();
        let notifier =
            MailNotifier::start(mailer.clone(), context(), Duration::from_secs(3600)).unwrap();
        notifier.send_passed();

        let mails = mailer.mails.lock().unwrap();
        assert_eq!(mails.len(), 2);

        assert_eq!(
            mails[0].subject,
            "S3 stability test plan TP-1 is in progress on https://s3.local"
        );
        assert!(mails[0].body.contains("https://ci.local/job/1"));
        let message_id = mails[0].message_id.clone().unwrap();
        assert!(mails[0].in_reply_to.is_none());

        assert_eq!(
            mails[1].subject,
            "S3 stability test plan TP-1 is passed on https://s3.local"
        );
        assert_eq!(mails[1].message_id, None);
        assert_eq!(mails[1].in_reply_to, Some(message_id));
    }

    #[test]
    fn repeats_progress_until_failed() {
        let mailer = RecordingMailer::default();
        let notifier =
            MailNotifier::start(mailer.clone(), context(), Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(100));
        notifier.send_failed();

        let mails = mailer.mails.lock().unwrap();
        assert!(mails.len() >= 3);
        let (last, progress) = mails.split_last().unwrap();
        assert!(last.subject.ends_with("is failed on https://s3.local"));
        assert!(progress.iter().all(|mail| mail.subject.contains("in progress")));
    }

    #[test]
    fn delivery_errors_are_ignored() {
        let mailer = RecordingMailer {
            fail: true,
            ..Default::default()
        };
        let notifier =
            MailNotifier::start(mailer.clone(), MailContext::default(), Duration::from_secs(60))
                .unwrap();
        notifier.send_passed();

        let mails = mailer.mails.lock().unwrap();
        assert_eq!(mails.len(), 2);
        assert_eq!(mails[1].subject, "S3 stability test plan is passed on ");
    }

    #[test]
    fn smtp_mailer_requires_receivers() {
        let mut mail = config::Mail {
            host: Some("smtp.local".into()),
            sender: Some("ci@example.com".into()),
            ..Default::default()
        };
        assert!(SmtpMailer::new(&mail).is_err());

        mail.receiver = Some("a@example.com,b@example.com".into());
        let mailer = SmtpMailer::new(&mail).unwrap();
        assert_eq!(mailer.receivers.len(), 2);
    }
}

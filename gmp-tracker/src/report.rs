use std::fmt::{Display, Formatter};
use std::panic::Location;

use error_stack::{AttachmentKind, Frame, FrameKind, Report};
use itertools::Itertools;
use valuable::Valuable;

/// An error report flattened into a causal chain of structured values, so it can be logged as
/// a field: `warn!(err = LoggableError::from(&report).as_value(), ...)`.
#[derive(Valuable, PartialEq, Debug, Default)]
pub struct LoggableError {
    pub msg: String,
    pub attachments: Vec<String>,
    pub location: String,
    pub cause: Option<Box<LoggableError>>,
}

impl Display for LoggableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)?;

        if !self.attachments.is_empty() {
            write!(f, " ({})", self.attachments.iter().join(", "))?;
        }

        match &self.cause {
            Some(cause) => write!(f, ": {cause}"),
            None => Ok(()),
        }
    }
}

impl std::error::Error for LoggableError {}

impl<T> From<&Report<T>> for LoggableError {
    fn from(report: &Report<T>) -> Self {
        // frames are ordered outermost first, each context preceded by its own attachments
        let mut errors = vec![];
        let mut current = LoggableError::default();

        for frame in report.frames() {
            match frame.kind() {
                FrameKind::Context(context) => {
                    current.msg = context.to_string();
                    current.attachments.reverse();
                    errors.push(std::mem::take(&mut current));
                }
                FrameKind::Attachment(AttachmentKind::Printable(printable)) => {
                    current.attachments.push(printable.to_string())
                }
                FrameKind::Attachment(AttachmentKind::Opaque(_)) => {
                    if let Some(location) = location(frame) {
                        current.location = location.to_string();
                    }
                }
                FrameKind::Attachment(_) => {}
            }
        }

        errors
            .into_iter()
            .rev()
            .fold(None, |cause: Option<LoggableError>, mut error| {
                error.cause = cause.map(Box::new);
                Some(error)
            })
            .unwrap_or_default()
    }
}

fn location(frame: &Frame) -> Option<&Location<'static>> {
    frame.downcast_ref::<Location<'static>>()
}

//! Structured identifiers attached to `tracing` spans at the boundaries
//! named in spec.md §5: Client, Transaction, Dialog, Conference.

use std::fmt;

/// A bundle of correlation identifiers threaded through a `tracing::span!`
/// at whichever of those boundaries is active.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub client_id: Option<String>,
    pub tid: Option<String>,
    pub dialog_id: Option<String>,
    pub conference_id: Option<String>,
}

impl LogContext {
    pub fn client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }

    pub fn with_tid(mut self, tid: impl Into<String>) -> Self {
        self.tid = Some(tid.into());
        self
    }

    pub fn with_dialog(mut self, dialog_id: impl Into<String>) -> Self {
        self.dialog_id = Some(dialog_id.into());
        self
    }

    pub fn with_conference(mut self, conference_id: impl Into<String>) -> Self {
        self.conference_id = Some(conference_id.into());
        self
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        let mut field = |name: &str, value: &Option<String>| -> fmt::Result {
            if let Some(v) = value {
                if wrote {
                    write!(f, " ")?;
                }
                write!(f, "{}={}", name, v)?;
                wrote = true;
            }
            Ok(())
        };
        field("client", &self.client_id)?;
        field("tid", &self.tid)?;
        field("dialog", &self.dialog_id)?;
        field("conference", &self.conference_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_only_populated_fields() {
        let ctx = LogContext::client("c1").with_tid("a1b2");
        assert_eq!(ctx.to_string(), "client=c1 tid=a1b2");
    }
}

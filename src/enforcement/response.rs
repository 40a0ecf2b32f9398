use bytes::Bytes;

use crate::logging;

/// Outcome of enforcing one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
    None,
}

/// The enforced result handed back to the caller.
///
/// A response is created at request entry with the ticket's identifier,
/// filled by the enforcement object, and consumed by the interface layer.
/// `has_content` gates the content buffer: a response without content
/// never exposes one, and attempts to attach content while the gate is
/// closed are a programming error that is logged and ignored rather than
/// propagated into the data path.
#[derive(Debug, Clone)]
pub struct Response {
    ticket_id: u64,
    status: ResponseStatus,
    has_content: bool,
    content: Bytes,
}

impl Response {
    pub fn new(ticket_id: u64) -> Response {
        Response {
            ticket_id,
            status: ResponseStatus::None,
            has_content: false,
            content: Bytes::new(),
        }
    }

    pub fn ticket_id(&self) -> u64 {
        self.ticket_id
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn content_size(&self) -> usize {
        self.content.len()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn set_ticket_id(&mut self, ticket_id: u64) {
        self.ticket_id = ticket_id;
    }

    pub fn set_status(&mut self, status: ResponseStatus) {
        self.status = status;
    }

    pub fn set_has_content(&mut self, has_content: bool) {
        self.has_content = has_content;
        if !has_content {
            self.content = Bytes::new();
        }
    }

    /// Attach a copy of `data` as the response content. Only legal after
    /// `set_has_content(true)`.
    pub fn set_content(&mut self, data: &[u8]) {
        if !self.has_content {
            slog::error!(
                logging::fallback(),
                "set_content on a response without content";
                "ticket_id" => self.ticket_id
            );
            return;
        }
        self.content = Bytes::copy_from_slice(data);
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::new(0)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self.status {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
            ResponseStatus::None => "none",
        };
        write!(
            f,
            "{}, {}, {}, {}",
            self.ticket_id,
            status,
            self.has_content,
            self.content.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_response_has_no_content() {
        let response = Response::new(3);
        assert_eq!(response.ticket_id(), 3);
        assert_eq!(response.status(), ResponseStatus::None);
        assert!(!response.has_content());
        assert_eq!(response.content_size(), 0);
    }

    #[test]
    fn content_round_trips() {
        let mut response = Response::new(1);
        response.set_has_content(true);
        response.set_content(b"enforced-bytes");
        assert_eq!(response.content(), b"enforced-bytes");
        assert_eq!(response.content_size(), 14);
        assert!(response.has_content());
    }

    #[test]
    fn set_content_without_gate_is_ignored() {
        let mut response = Response::new(1);
        response.set_content(b"should not stick");
        assert!(!response.has_content());
        assert_eq!(response.content_size(), 0);
    }

    #[test]
    fn clearing_the_gate_drops_content() {
        let mut response = Response::new(1);
        response.set_has_content(true);
        response.set_content(b"bytes");
        response.set_has_content(false);
        assert_eq!(response.content_size(), 0);
    }
}

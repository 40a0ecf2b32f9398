use bytes::Bytes;

use crate::core::definitions;

/// One classified I/O request flowing through a channel.
///
/// A ticket carries the request's identity and cost. `payload` is the
/// token cost of the request (at least 1), `total_operations` the number
/// of operations batched behind it (iterators, batch writes). Content-less
/// requests (rate limiting only) leave the buffer empty; content-bearing
/// requests copy the caller's bytes in at construction.
#[derive(Debug, Clone)]
pub struct Ticket {
    ticket_id: u64,
    total_operations: i32,
    payload: i64,
    operation_type: i32,
    operation_context: i32,
    buffer: Bytes,
}

impl Ticket {
    /// Build a content-less ticket.
    pub fn new(
        ticket_id: u64,
        total_operations: i32,
        payload: i64,
        operation_type: i32,
        operation_context: i32,
    ) -> Ticket {
        Ticket {
            ticket_id,
            total_operations,
            payload: payload.max(1),
            operation_type,
            operation_context,
            buffer: Bytes::new(),
        }
    }

    /// Build a ticket that owns a copy of the request's content.
    pub fn with_buffer(
        ticket_id: u64,
        total_operations: i32,
        payload: i64,
        operation_type: i32,
        operation_context: i32,
        data: &[u8],
    ) -> Ticket {
        Ticket {
            ticket_id,
            total_operations,
            payload: payload.max(1),
            operation_type,
            operation_context,
            buffer: Bytes::copy_from_slice(data),
        }
    }

    pub fn ticket_id(&self) -> u64 {
        self.ticket_id
    }

    pub fn total_operations(&self) -> i32 {
        self.total_operations
    }

    pub fn payload(&self) -> i64 {
        self.payload
    }

    pub fn operation_type(&self) -> i32 {
        self.operation_type
    }

    pub fn operation_context(&self) -> i32 {
        self.operation_context
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Ticket::new(0, 0, 1, definitions::NO_OP, definitions::NO_OP)
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}",
            self.ticket_id,
            self.total_operations,
            self.payload,
            self.operation_type,
            self.operation_context
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_copied_at_construction() {
        let mut source = vec![1u8, 2, 3, 4];
        let ticket = Ticket::with_buffer(1, 1, 1, 0, 0, &source);
        source[0] = 99;
        assert_eq!(ticket.buffer(), &[1, 2, 3, 4]);
        assert_eq!(ticket.buffer_size(), 4);
    }

    #[test]
    fn contentless_ticket_has_empty_buffer() {
        let ticket = Ticket::new(7, 1, 1, 0, 0);
        assert_eq!(ticket.buffer_size(), 0);
        assert!(ticket.buffer().is_empty());
    }

    #[test]
    fn payload_floors_at_one() {
        let ticket = Ticket::new(1, 1, 0, 0, 0);
        assert_eq!(ticket.payload(), 1);
        let ticket = Ticket::new(1, 1, -5, 0, 0);
        assert_eq!(ticket.payload(), 1);
    }

    #[test]
    fn clone_round_trips_content() {
        let ticket = Ticket::with_buffer(9, 2, 8, 1, 2, b"payload-bytes");
        let copy = ticket.clone();
        assert_eq!(copy.ticket_id(), 9);
        assert_eq!(copy.buffer(), b"payload-bytes");
        assert_eq!(copy.buffer_size(), ticket.buffer_size());
    }
}

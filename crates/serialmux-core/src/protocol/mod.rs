//! The device line protocol.
//!
//! The device speaks newline-terminated text.  A line whose first character
//! is `#` is a comment: it is never answered, never correlated and never
//! broadcast.  Every other non-blank line is either a command (client to
//! device) or a reply/notification (device to client).  A reply answers a
//! command when both start with the same whitespace-delimited word.

pub mod line;

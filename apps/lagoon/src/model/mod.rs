pub mod chat;
pub mod presence;

/// Row id of a contact in the device-local address book.
pub type ContactId = i64;

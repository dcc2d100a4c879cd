pub mod payload;

pub use payload::{
    decode_items, LagoonPolicy, NoticeKind, PayloadItem, ServerError, SystemNotice,
};

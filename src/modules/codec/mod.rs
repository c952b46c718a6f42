// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Pure codec helpers the message model depends on: modified UTF-7
//! mailbox names, RFC 2047 encoded-words, RFC 2231 extended parameters,
//! format=flowed wrapping, quoted-printable and base64 transfer
//! encodings, mail address parsing and UID-set arithmetic.

pub mod address;
pub mod flowed;
pub mod qp;
pub mod rfc2047;
pub mod rfc2231;
pub mod uidset;
pub mod utf7;

//! Outbound integrations: transactional email and prescription OCR.

pub mod email;
pub mod ocr;

//! Short public codes that let a user join a document as a collaborator.

use rand::Rng;

use crate::{CoeditError, CoeditResult};

pub const JOIN_CODE_LEN: usize = 6;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draw a fresh code, every character uniformly from `[A-Z0-9]`
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Normalise user input for lookup; codes compare case-insensitively
pub fn normalize(code: &str) -> CoeditResult<String> {
    let code = code.trim().to_ascii_uppercase();

    if code.len() != JOIN_CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(CoeditError::validation(format!(
            "join code must be {} letters or digits",
            JOIN_CODE_LEN
        )));
    }

    Ok(code)
}

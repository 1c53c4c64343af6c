pub mod html;

pub use html::{parse_html, ParsedPage};

/// Max bytes handed to the HTML parser. Larger bodies are truncated first.
pub const MAX_PARSE_SIZE: usize = 5 * 1024 * 1024;

/// Lossy-decode a response body for parsing, applying the parse cap.
pub fn body_to_string(body: &[u8]) -> String {
    let slice = if body.len() > MAX_PARSE_SIZE {
        &body[..MAX_PARSE_SIZE]
    } else {
        body
    };
    String::from_utf8_lossy(slice).into_owned()
}

//! HTTP responses for node handler results.

use anyhow::{Result, anyhow};
use tiny_http::{Header, Request, Response as HttpResponse, StatusCode};

use crate::serve::{FileStream, Response};

const PLAIN: &str = "text/plain; charset=utf-8";
const BINARY: &str = "application/octet-stream";

/// Send a handler result: bytes, a file stream, or an empty 404.
pub fn respond(request: Request, result: Option<Response>) -> Result<()> {
    match result {
        Some(Response::Bytes(body)) => send_body(request, 200, body),
        Some(Response::Stream(stream)) => send_stream(request, stream),
        None => respond_status(request, 404),
    }
}

/// Respond with an empty body.
pub fn respond_status(request: Request, status: u16) -> Result<()> {
    request.respond(HttpResponse::empty(StatusCode(status)))?;
    Ok(())
}

fn send_body(request: Request, status: u16, body: Vec<u8>) -> Result<()> {
    let response = HttpResponse::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(make_header("Content-Type", PLAIN)?);
    request.respond(response)?;
    Ok(())
}

fn send_stream(request: Request, stream: FileStream) -> Result<()> {
    let mut headers = vec![make_header("Content-Type", BINARY)?];
    if let Some(name) = stream.name() {
        let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(&name));
        headers.push(make_header("Content-Disposition", &disposition)?);
    }

    let size = usize::try_from(stream.size).ok();
    let response = HttpResponse::new(StatusCode(200), headers, stream, size, None);
    request.respond(response)?;
    Ok(())
}

/// Keep a file name safe inside a quoted header parameter.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

fn make_header(key: &str, value: &str) -> Result<Header> {
    Header::from_bytes(key.as_bytes(), value.as_bytes())
        .map_err(|()| anyhow!("invalid header {}: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("a\"b\\c\n.txt"), "a_b_c_.txt");
    }

    #[test]
    fn test_make_header() {
        let header = make_header("Content-Type", PLAIN).unwrap();
        assert!(header.field.equiv("content-type"));
        assert_eq!(header.value.as_str(), PLAIN);
    }
}

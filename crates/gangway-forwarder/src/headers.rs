//! Request and response header copying.

use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Headers the outbound runtime manages itself; forwarding them back would
/// corrupt the inbound framing.
const SKIPPED_RESPONSE_HEADERS: [HeaderName; 1] = [header::TRANSFER_ENCODING];

/// Copy request headers from the inbound request into the outbound bag.
///
/// Skips empty values and HTTP/2 pseudo-headers, and folds multi-value
/// `Cookie` headers into a single `"; "`-joined value, which is what RFC 6265
/// expects even though some inbound runtimes surface them split up.
pub fn copy_request_headers(source: &HeaderMap, dest: &mut HeaderMap) {
    let mut cookies_folded = false;
    for (name, value) in source.iter() {
        if value.is_empty() {
            continue;
        }
        if name.as_str().starts_with(':') {
            continue;
        }
        if name == header::COOKIE {
            if !cookies_folded {
                cookies_folded = true;
                if let Some(folded) = fold_cookies(source) {
                    dest.insert(header::COOKIE, folded);
                }
            }
            continue;
        }
        dest.append(name.clone(), value.clone());
    }
}

/// Copy response headers verbatim, preserving multi-value structure.
pub fn copy_response_headers(source: &HeaderMap, dest: &mut HeaderMap) {
    for (name, value) in source.iter() {
        if SKIPPED_RESPONSE_HEADERS.iter().any(|skip| skip == name) {
            continue;
        }
        dest.append(name.clone(), value.clone());
    }
}

fn fold_cookies(source: &HeaderMap) -> Option<HeaderValue> {
    let mut joined: Vec<u8> = Vec::new();
    for value in source.get_all(header::COOKIE) {
        if value.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.extend_from_slice(b"; ");
        }
        joined.extend_from_slice(value.as_bytes());
    }
    if joined.is_empty() {
        return None;
    }
    // Joining valid header values with "; " cannot produce an invalid one.
    HeaderValue::from_bytes(&joined).ok()
}

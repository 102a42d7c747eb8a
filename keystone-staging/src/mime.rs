//! Content-type helpers used by upload constraints and transports.

const OCTET_STREAM: &str = "application/octet-stream";

/// Pick the effective content type of a file: the declared one unless it is
/// missing or generic, otherwise a guess from the file extension.
pub fn resolve(declared: Option<&str>, file_name: &str) -> Option<String> {
    let declared = declared
        .map(normalize)
        .filter(|ct| !ct.is_empty() && ct != OCTET_STREAM);

    declared.or_else(|| from_extension(file_name).map(str::to_string))
}

/// Guess a content type from the file extension
pub fn from_extension(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    let ct = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(ct)
}

/// Does `content_type` satisfy `pattern` (`image/png`, `image/*` or `*/*`)?
pub fn matches(pattern: &str, content_type: &str) -> bool {
    let pattern = normalize(pattern);
    let content_type = normalize(content_type);

    if pattern == "*/*" || pattern == "*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(top) => content_type
            .split_once('/')
            .map_or(false, |(ct_top, _)| ct_top == top),
        None => pattern == content_type,
    }
}

/// Lowercase and drop parameters (`image/png; charset=x` -> `image/png`)
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

use once_cell::sync::Lazy;
use regex::Regex;

static DATA_URL_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(?P<mime>[^;,]*)(?:;[^;,]*)*?;base64,").expect("valid data url regex")
});

/// Base64 audio with the mime type it will be sent under.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub data: String,
    pub mime_type: String,
}

impl AudioPayload {
    /// Accepts raw base64 or a `data:<mime>;base64,` URL. An explicit mime
    /// type wins over the one in the data URL, which wins over `default_mime`.
    pub fn from_request(audio_data: &str, mime_type: Option<&str>, default_mime: &str) -> Self {
        let (data, embedded_mime) = strip_data_url_prefix(audio_data);
        let mime_type = mime_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or(embedded_mime)
            .unwrap_or(default_mime)
            .to_string();
        AudioPayload {
            data: data.to_string(),
            mime_type,
        }
    }
}

/// Returns the base64 body and, when present, the data URL's mime type.
pub fn strip_data_url_prefix(input: &str) -> (&str, Option<&str>) {
    let trimmed = input.trim();
    match DATA_URL_PREFIX_RE.captures(trimmed) {
        Some(captures) => {
            let prefix_len = captures.get(0).map(|m| m.end()).unwrap_or(0);
            let mime = captures
                .name("mime")
                .map(|m| m.as_str())
                .filter(|value| !value.is_empty());
            (&trimmed[prefix_len..], mime)
        }
        None => (trimmed, None),
    }
}

/// Maps browser recorder mime types onto the names Gemini accepts.
pub fn normalize_gemini_mime_type(mime_type: &str) -> String {
    let essence = mime_type.split(';').next().unwrap_or(mime_type);
    let lowered = essence.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "audio/mpeg" => "audio/mp3".to_string(),
        "audio/x-wav" | "audio/wave" => "audio/wav".to_string(),
        "audio/x-m4a" => "audio/m4a".to_string(),
        "audio/x-aac" => "audio/aac".to_string(),
        _ => lowered,
    }
}

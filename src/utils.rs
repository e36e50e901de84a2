use crate::api::Platform;

/// Case-insensitive host match on the raw URL text.
pub fn detect_platform(url: &str) -> Platform {
    let url = url.to_lowercase();
    if url.contains("spotify.com") {
        Platform::Spotify
    } else if url.contains("jiosaavn.com") || url.contains("saavn.com") {
        Platform::JioSaavn
    } else {
        Platform::Youtube
    }
}

/// Track id the metadata endpoint expects. YouTube has no id form, the
/// whole URL is passed through.
pub fn extract_id_from_url(url: &str, platform: Platform) -> String {
    match platform {
        Platform::Spotify => substring_between(url, "/track/", '?'),
        Platform::JioSaavn => substring_between(url, "/song/", '/'),
        Platform::Youtube => url.to_string(),
    }
}

// Text after `marker` up to `end`. Missing marker keeps the whole input.
fn substring_between(s: &str, marker: &str, end: char) -> String {
    let after = match s.find(marker) {
        Some(idx) => &s[idx + marker.len()..],
        None => s,
    };
    match after.find(end) {
        Some(idx) => after[..idx].to_string(),
        None => after.to_string(),
    }
}

/// `MM:SS`; minutes are not wrapped into hours.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Progress bar text for a 0.0..=1.0 fraction.
pub fn format_progress(progress: f32) -> String {
    format!("{:.0}%", (progress.clamp(0.0, 1.0) * 100.0).round())
}

//! Direct-navigation shortcuts for well-known destinations.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Mapping from destination names users type to the URL to open directly.
pub static DIRECT_DESTINATIONS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = BTreeMap::new();

    // Search & Video
    m.insert("google", "https://www.google.com");
    m.insert("youtube", "https://www.youtube.com");
    m.insert("yt", "https://www.youtube.com");
    m.insert("netflix", "https://www.netflix.com");
    m.insert("spotify", "https://www.spotify.com");

    // Productivity
    m.insert("docs", "https://docs.google.com");
    m.insert("google docs", "https://docs.google.com");
    m.insert("gmail", "https://mail.google.com");
    m.insert("chatgpt", "https://chat.openai.com");
    m.insert("github", "https://www.github.com");

    // Shopping
    m.insert("amazon", "https://www.amazon.com");

    // Social
    m.insert("facebook", "https://www.facebook.com");
    m.insert("twitter", "https://www.twitter.com");
    m.insert("x", "https://www.twitter.com");
    m.insert("instagram", "https://www.instagram.com");
    m.insert("linkedin", "https://www.linkedin.com");
    m.insert("reddit", "https://www.reddit.com");

    m
});

/// Get the direct URL for a destination name, ignoring case.
pub fn get_destination(name: &str) -> Option<&'static str> {
    DIRECT_DESTINATIONS
        .get(name.trim().to_lowercase().as_str())
        .copied()
}

/// Render the shortcut table as prompt lines, one URL per line with all of
/// its names.
pub fn shortcut_lines() -> String {
    let mut by_url: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, url) in DIRECT_DESTINATIONS.iter() {
        by_url.entry(url).or_default().push(name);
    }

    by_url
        .into_iter()
        .map(|(url, names)| {
            let names = names
                .iter()
                .map(|n| format!("\"open {}\"", n))
                .collect::<Vec<_>>()
                .join(" or ");
            format!("- {} -> {}", names, url)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

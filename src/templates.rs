//! Built-in title generators that can be dropped into a rule's `titleScript`.
//!
//! Each script is a `(title) => string` function evaluated in the page, where
//! `title` is the page's original title.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TitleTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub script: &'static str,
    /// Suggested repeat interval in seconds.
    pub interval: i64,
}

pub const TEMPLATES: &[TitleTemplate] = &[
    TitleTemplate {
        name: "show-time",
        description: "Prefix the title with the current time",
        script: "(title) => `[${new Date().toLocaleTimeString()}] ${title}`",
        interval: 1,
    },
    TitleTemplate {
        name: "show-duration",
        description: "Prefix the title with how long the page has been open",
        script: r#"(title) => {
  window._titleStartTime = window._titleStartTime || Date.now();
  const seconds = Math.floor((Date.now() - window._titleStartTime) / 1000);
  const minutes = Math.floor(seconds / 60);
  const hours = Math.floor(minutes / 60);
  const elapsed = hours > 0 ? `${hours}h${minutes % 60}m` : `${minutes}m${seconds % 60}s`;
  return `[${elapsed}] ${title}`;
}"#,
        interval: 1,
    },
    TitleTemplate {
        name: "video-progress",
        description: "Prefix the title with the progress of the first video",
        script: r#"(title) => {
  const video = document.querySelector('video');
  if (!video || !video.duration) return title;
  return `[${Math.floor((video.currentTime / video.duration) * 100)}%] ${title}`;
}"#,
        interval: 2,
    },
    TitleTemplate {
        name: "unread-count",
        description: "Prefix the title with the number of .unread-message elements",
        script: r#"(title) => {
  const count = document.querySelectorAll('.unread-message').length;
  return count > 0 ? `(${count}) ${title}` : title;
}"#,
        interval: 5,
    },
];

pub fn find(name: &str) -> Option<&'static TitleTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}

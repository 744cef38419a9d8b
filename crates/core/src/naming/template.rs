//! yt-dlp style output templates (`%(title)s`, `%(title).200s`).

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::HashMap;

use super::sanitize::{sanitize, sanitize_component};
use crate::fetcher::SourceMetadata;
use crate::job::OutputProfile;

static TOKEN_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"%\(([A-Za-z_][A-Za-z0-9_]*)\)(?:\.(\d+))?s").ok());

/// Values available to a template, keyed by token name.
pub type TemplateFields = HashMap<&'static str, String>;

/// Expands every `%(name)s` / `%(name).Ns` token in `template`.
///
/// Returns `None` when a referenced token has no value, so the caller can
/// try a fallback template. `.N` truncates the value to N characters.
pub fn render_template(template: &str, fields: &TemplateFields) -> Option<String> {
    let re = TOKEN_RE.as_ref()?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str();
        let value = fields.get(name).filter(|v| !v.trim().is_empty())?;

        out.push_str(&template[last..whole.start()]);
        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(limit) => out.extend(value.chars().take(limit)),
            None => out.push_str(value),
        }
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Some(out)
}

/// Collects the template fields for a resolved track.
pub fn template_fields(metadata: &SourceMetadata, ext: &str) -> TemplateFields {
    let mut fields = TemplateFields::new();
    fields.insert("id", metadata.id.clone());
    fields.insert("title", metadata.title.clone());
    fields.insert("ext", ext.to_string());
    if let Some(artist) = &metadata.artist {
        fields.insert("artist", artist.clone());
    }
    if let Some(uploader) = &metadata.uploader {
        fields.insert("uploader", uploader.clone());
    }
    if let Some(album) = &metadata.album {
        fields.insert("album", album.clone());
    }
    fields
}

/// Computes the final file name for a track under `profile`.
///
/// Tries the primary template, then the fallback template, then
/// `title.ext`. The result is sanitized and always carries the extension of
/// the profile's format.
pub fn output_file_name(profile: &OutputProfile, metadata: &SourceMetadata) -> String {
    let ext = profile.format.extension();
    let fields = template_fields(metadata, ext);

    let rendered = render_template(&profile.output_template, &fields)
        .or_else(|| render_template(&profile.fallback_template, &fields))
        .unwrap_or_else(|| format!("{}.{}", metadata.title, ext));

    let suffix = format!(".{}", ext);
    let with_ext = if rendered.ends_with(&suffix) {
        rendered
    } else {
        format!("{}{}", rendered, suffix)
    };

    sanitize(&with_ext)
}

/// Directory name used when artist folders are enabled.
pub fn artist_folder(metadata: &SourceMetadata) -> String {
    sanitize_component(metadata.display_artist())
}

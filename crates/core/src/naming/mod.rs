//! File naming: sanitization and output templates.

mod sanitize;
mod template;

pub use sanitize::{
    sanitize, sanitize_component, DISALLOWED_CHARS, MAX_FILENAME_BYTES, PLACEHOLDER_NAME,
};
pub use template::{
    artist_folder, output_file_name, render_template, template_fields, TemplateFields,
};

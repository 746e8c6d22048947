//! Terminal styling helpers.

use owo_colors::OwoColorize;

fn enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

pub fn success(text: impl AsRef<str>) -> String {
    paint(text.as_ref(), |text| text.green().bold().to_string())
}

pub fn warning(text: impl AsRef<str>) -> String {
    paint(text.as_ref(), |text| text.yellow().to_string())
}

pub fn error(text: impl AsRef<str>) -> String {
    paint(text.as_ref(), |text| text.red().bold().to_string())
}

pub fn accent(text: impl AsRef<str>) -> String {
    paint(text.as_ref(), |text| text.cyan().to_string())
}

pub fn dim(text: impl AsRef<str>) -> String {
    paint(text.as_ref(), |text| text.dimmed().to_string())
}

fn paint(text: &str, styled: impl FnOnce(&str) -> String) -> String {
    if enabled() {
        styled(text)
    } else {
        text.to_string()
    }
}

//! Text measurement and wrapping for the built-in Helvetica font.

/// Marker appended to a line that was cut short.
pub const ELLIPSIS: &str = "...";

/// Advance widths of printable ASCII (0x20..=0x7E) in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// Width used for characters outside printable ASCII.
const FALLBACK_WIDTH: u16 = 556;

fn char_width(c: char, font_size: f64) -> f64 {
    let units = u32::from(c)
        .checked_sub(0x20)
        .and_then(|i| HELVETICA_WIDTHS.get(i as usize))
        .copied()
        .unwrap_or(FALLBACK_WIDTH);
    f64::from(units) * font_size / 1000.0
}

/// Width of `text` set in Helvetica at `font_size` points.
#[must_use]
pub fn text_width(text: &str, font_size: f64) -> f64 {
    text.chars().map(|c| char_width(c, font_size)).sum()
}

/// Break `text` into lines no wider than `max_width`.
///
/// Lines break at whitespace; a word wider than the line is split at
/// character boundaries. Every line holds at least one character, so a very
/// narrow width still makes progress.
#[must_use]
pub fn wrap_text(text: &str, font_size: f64, max_width: f64) -> Vec<String> {
    let space = char_width(' ', font_size);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0.0;

    for word in text.split_whitespace() {
        let word_width = text_width(word, font_size);

        if !current.is_empty() && current_width + space + word_width <= max_width {
            current.push(' ');
            current.push_str(word);
            current_width += space + word_width;
            continue;
        }

        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_width = 0.0;
        }

        if word_width <= max_width {
            current.push_str(word);
            current_width = word_width;
            continue;
        }

        for c in word.chars() {
            let w = char_width(c, font_size);
            if !current.is_empty() && current_width + w > max_width {
                lines.push(std::mem::take(&mut current));
                current_width = 0.0;
            }
            current.push(c);
            current_width += w;
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Keep at most `max_lines` lines, marking the last kept line with an
/// ellipsis when anything was dropped.
#[must_use]
pub fn clamp_lines(
    mut lines: Vec<String>,
    max_lines: usize,
    font_size: f64,
    max_width: f64,
) -> Vec<String> {
    if lines.len() <= max_lines {
        return lines;
    }
    lines.truncate(max_lines);
    if let Some(last) = lines.last_mut() {
        *last = with_ellipsis(last, font_size, max_width);
    }
    lines
}

/// Shorten `line` until it fits `max_width` with the ellipsis appended.
#[must_use]
pub fn with_ellipsis(line: &str, font_size: f64, max_width: f64) -> String {
    let marker_width = text_width(ELLIPSIS, font_size);
    let mut kept = line.to_string();
    while !kept.is_empty() && text_width(&kept, font_size) + marker_width > max_width {
        kept.pop();
    }
    kept.push_str(ELLIPSIS);
    kept
}

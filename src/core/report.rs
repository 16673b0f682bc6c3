// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Shared reporting helpers for diagnostics rendering.

/// Mark the character at the 1-based `column` of `line`.
///
/// With colour the character is wrapped in red ANSI escapes; past the end
/// of the line a caret is appended instead.
pub fn highlight_line(line: &str, column: Option<usize>, use_color: bool) -> String {
    let Some(col) = column.filter(|col| *col > 0) else {
        return line.to_string();
    };
    let Some((idx, ch)) = line.char_indices().nth(col - 1) else {
        return if use_color {
            format!("{line}\x1b[31m^\x1b[0m")
        } else {
            format!("{line}^")
        };
    };
    if !use_color {
        return line.to_string();
    }
    let rest = &line[idx + ch.len_utf8()..];
    format!("{}\x1b[31m{ch}\x1b[0m{rest}", &line[..idx])
}

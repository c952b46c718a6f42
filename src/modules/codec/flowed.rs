// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Paragraph wrapping for `format=flowed` bodies (RFC 3676).
//!
//! Breaks happen after a space, so the trailing space marks the line
//! as soft-wrapped. The budget counts Unicode code points, not bytes;
//! the quoted-printable pass downstream deals with octets.

/// Budget per line. Q-P allows 76 characters before the trailing CRLF
/// and the flowed marker space has to fit inside it.
const DEFAULT_CUTOFF: usize = 75;

/// Wrap one block of text into flowed lines joined by CRLF.
///
/// Quoted lines keep their quote prefix on every produced line, the
/// break position is never inside the prefix, and no line is emitted
/// whose only content past the prefix would be the flow marker space.
/// When no space exists within the budget the break moves to the
/// first space after it; a line without any usable space stays long.
pub fn wrap_format_flowed(input: &str) -> String {
    let mut res: Vec<String> = Vec::new();

    for raw_line in input.split('\n') {
        let line: Vec<char> = raw_line.chars().filter(|&c| c != '\r').collect();
        if line.is_empty() {
            res.push(String::new());
            continue;
        }

        // leading '>' run plus one optional space is the quote prefix;
        // soft-wrapped continuations must repeat it to keep the depth
        let mut prefix_len = 0;
        while prefix_len < line.len() && line[prefix_len] == '>' {
            prefix_len += 1;
        }
        if prefix_len > 0 && line.get(prefix_len) == Some(&' ') {
            prefix_len += 1;
        }
        let prefix: String = line[..prefix_len].iter().collect();

        let content = &line[prefix_len..];
        let cutoff = DEFAULT_CUTOFF.saturating_sub(prefix_len).max(1);

        let mut previous_break = 0;
        let mut first_chunk = true;
        while previous_break < content.len() || first_chunk {
            let mut size = cutoff;
            if content.len() <= previous_break + size {
                // remainder fits
            } else if content[previous_break + size] == ' ' {
                // found the break point right at the budget
            } else {
                // walk back to the last space within the budget
                while size > 0 && content[previous_break + size] != ' ' {
                    size -= 1;
                }
                if size == 0 {
                    // no space fits; break at the first space after the
                    // budget instead of splitting a word
                    size = cutoff;
                    while previous_break + size < content.len()
                        && content[previous_break + size] != ' '
                    {
                        size += 1;
                    }
                }
            }

            // the break goes after the space so the space flows
            size += 1;
            let end = (previous_break + size).min(content.len());
            let chunk: String = content[previous_break..end].iter().collect();
            res.push(format!("{prefix}{chunk}"));
            previous_break += size;
            first_chunk = false;
        }
    }

    res.join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_line_len(wrapped: &str) -> usize {
        wrapped.split("\r\n").map(|l| l.chars().count()).max().unwrap_or(0)
    }

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(wrap_format_flowed("hello world"), "hello world");
        assert_eq!(wrap_format_flowed(""), "");
    }

    #[test]
    fn long_line_breaks_at_space_within_budget() {
        let words = "word ".repeat(40);
        let wrapped = wrap_format_flowed(words.trim_end());
        assert!(max_line_len(&wrapped) <= 76);
        // soft-wrapped lines end with the flow marker space
        let lines: Vec<&str> = wrapped.split("\r\n").collect();
        for line in &lines[..lines.len() - 1] {
            assert!(line.ends_with(' '), "missing flow marker: {line:?}");
        }
        let rejoined: String = wrapped.replace("\r\n", "");
        assert_eq!(rejoined, words.trim_end());
    }

    #[test]
    fn break_lands_at_last_space_within_cutoff() {
        // spaces only early in the line; the rest is one 150-char run
        let input = format!("one two {}", "x".repeat(150));
        let wrapped = wrap_format_flowed(&input);
        let lines: Vec<&str> = wrapped.split("\r\n").collect();
        assert_eq!(lines[0], "one two ");
        assert_eq!(lines[1], "x".repeat(150));
    }

    #[test]
    fn mandatory_break_at_first_later_space() {
        let input = format!("{} tail", "y".repeat(100));
        let wrapped = wrap_format_flowed(&input);
        let lines: Vec<&str> = wrapped.split("\r\n").collect();
        assert_eq!(lines[0], format!("{} ", "y".repeat(100)));
        assert_eq!(lines[1], "tail");
    }

    #[test]
    fn unbreakable_line_stays_long() {
        let input = "z".repeat(200);
        assert_eq!(wrap_format_flowed(&input), input);
    }

    #[test]
    fn quoted_paragraph_keeps_quote_depth() {
        let input = format!("> {}", "quoted words here ".repeat(10).trim_end());
        let wrapped = wrap_format_flowed(&input);
        for line in wrapped.split("\r\n") {
            assert!(line.starts_with("> "), "quote depth lost: {line:?}");
        }
        assert!(max_line_len(&wrapped) <= 76);
    }

    #[test]
    fn no_quote_only_continuation_lines() {
        let input = format!(">>> {}", "w".repeat(120));
        let wrapped = wrap_format_flowed(&input);
        for line in wrapped.split("\r\n") {
            let past_quotes: String = line.chars().filter(|&c| c != '>' && c != ' ').collect();
            assert!(!past_quotes.is_empty(), "quote-only line: {line:?}");
        }
    }

    #[test]
    fn empty_lines_survive() {
        let input = "para one\n\npara two";
        assert_eq!(wrap_format_flowed(input), "para one\r\n\r\npara two");
    }

    #[test]
    fn budget_includes_crlf_inside_78() {
        let words = "alpha beta gamma delta ".repeat(20);
        let wrapped = wrap_format_flowed(words.trim_end());
        for line in wrapped.split("\r\n") {
            assert!(line.chars().count() + 2 <= 78, "line over budget: {line:?}");
        }
    }
}

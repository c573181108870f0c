//! Size limits on tool output before it is fed back to the model.

const DEFAULT_MAX_OUTPUT: usize = 50 * 1024; // 50KB
const TERMINAL_MAX_OUTPUT: usize = 200 * 1024; // 200KB

/// Returns the max output size for a given tool name. Terminal output gets
/// a larger allowance since build logs are routinely consulted in full.
pub fn max_output_for_tool(tool_name: &str) -> usize {
    match tool_name {
        "run_terminal" => TERMINAL_MAX_OUTPUT,
        _ => DEFAULT_MAX_OUTPUT,
    }
}

/// Truncate tool output if it exceeds `max_bytes`, cutting at a char
/// boundary and appending a marker with the original vs truncated size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let boundary = floor_char_boundary(output, max_bytes);
    let truncated = &output[..boundary];
    format!(
        "{truncated}\n\n[truncated: {} bytes -> {} bytes]",
        output.len(),
        boundary
    )
}

/// Largest byte index `<= index` that lands on a char boundary.
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        let input = "hello world";
        assert_eq!(truncate_output(input, 1024), input);
    }

    #[test]
    fn truncates_at_limit() {
        let input = "a".repeat(1000);
        let result = truncate_output(&input, 100);
        assert!(result.len() < 200);
        assert!(result.contains("[truncated: 1000 bytes -> 100 bytes]"));
        assert!(result.starts_with("aaaa"));
    }

    #[test]
    fn truncates_at_char_boundary() {
        // 4-byte chars; the cut at byte 10 must fall back to byte 8.
        let input = "\u{1F980}".repeat(100);
        let result = truncate_output(&input, 10);
        assert!(result.contains("[truncated: 400 bytes -> 8 bytes]"));
        assert!(result.starts_with('\u{1F980}'));
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_output(&input, 100), input);
    }

    #[test]
    fn one_over_truncates() {
        let input = "a".repeat(101);
        let result = truncate_output(&input, 100);
        assert!(result.contains("[truncated: 101 bytes -> 100 bytes]"));
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_output("", 100), "");
    }

    #[test]
    fn terminal_gets_larger_limit() {
        assert_eq!(max_output_for_tool("run_terminal"), 200 * 1024);
        assert_eq!(max_output_for_tool("read_file"), 50 * 1024);
        assert_eq!(max_output_for_tool("grep_search"), 50 * 1024);
    }
}

/// Pulls the first balanced `{...}` block out of a model reply, skipping any
/// `<think>` sections and surrounding prose or code fences.
pub fn extract_json_object(input: &str) -> Option<String> {
    let mut cleaned = input.to_string();

    while let Some(think_start) = cleaned.find("<think>") {
        if let Some(think_end_pos) = cleaned[think_start..].find("</think>") {
            let absolute_end = think_start + think_end_pos + "</think>".len();
            cleaned.replace_range(think_start..absolute_end, "");
        } else {
            cleaned.replace_range(think_start.., "");
            break;
        }
    }

    let trimmed = cleaned.trim();
    let start = trimmed.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in trimmed[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + idx;
                    return Some(trimmed[start..=end].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

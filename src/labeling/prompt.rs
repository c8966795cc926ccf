//! Prompt construction for chat-model labelers.

use super::LabelContext;

/// Characters of each representative text included in a prompt.
pub const MAX_TEXT_CHARS: usize = 500;

/// How a level is described to the model.
pub fn level_description(level: u32) -> String {
    match level {
        1 => "broad categories".to_string(),
        2 => "sub-categories".to_string(),
        3 => "specific themes".to_string(),
        4 => "detailed sub-themes".to_string(),
        5 => "granular topics".to_string(),
        other => format!("level {other} topics"),
    }
}

fn title_guidance(level: u32) -> &'static str {
    match level {
        1 => "2-4 word title for this broad category",
        2 => "2-3 word title for this sub-category",
        _ => "2-4 word specific title for this theme",
    }
}

/// Path from the root to the parent, joined with " > ".
pub fn hierarchy_path(context: &LabelContext<'_>) -> String {
    context
        .ancestors
        .iter()
        .map(String::as_str)
        .chain(context.parent_title)
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Full user prompt for labeling one cluster.
pub fn build_prompt(texts: &[String], context: &LabelContext<'_>) -> String {
    let level = context.level;
    let level_desc = level_description(level);
    let parent = context.parent_title.unwrap_or_default();

    let situation = if level <= 1 {
        format!(
            "You are categorizing user feedback into {level_desc} (Level 1 topics).\n\
             These are the broadest groupings of feedback themes."
        )
    } else if context.ancestors.is_empty() {
        format!(
            "You are categorizing user feedback within the category \"{parent}\".\n\
             This is a Level {level} topic ({level_desc})."
        )
    } else {
        format!(
            "You are categorizing user feedback within the hierarchy: {}\n\
             This is a Level {level} topic ({level_desc}), which should be more specific than its parent \"{parent}\".",
            hierarchy_path(context)
        )
    };

    let items: Vec<String> = texts
        .iter()
        .map(|text| format!("- {}", truncate_chars(text, MAX_TEXT_CHARS)))
        .collect();

    format!(
        "{situation}\n\n\
         Analyze these {count} representative feedback items from a cluster of {size} total items.\n\n\
         Feedback items:\n{items}\n\n\
         Based on the common theme in these items, provide:\n\
         1. A concise {guidance}\n\
         2. A single sentence description (max 100 characters)\n\n\
         Important: The title should be distinct from the parent category and capture what makes this sub-group unique.\n\n\
         Respond ONLY with valid JSON in this exact format:\n\
         {{\"title\": \"Example Title\", \"description\": \"Brief description of what this category contains.\"}}",
        count = texts.len(),
        size = context.cluster_size,
        items = items.join("\n"),
        guidance = title_guidance(level),
    )
}

//! Table formatting for build results and topic trees.

use crate::types::{BuildResult, BuildStatus, Topic, TopicId};
use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};
use std::collections::HashMap;

fn base_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn bold_cells(headers: Vec<&str>) -> Vec<Cell> {
    headers
        .into_iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
        .collect()
}

/// Metric/value table for one build.
pub fn create_build_summary_table(result: &BuildResult) -> String {
    let mut table = base_table();
    table.set_header(bold_cells(vec!["Metric", "Value"]));

    let (status_text, color) = match result.status {
        BuildStatus::Completed => (format!("✓ {}", result.status), Color::Green),
        BuildStatus::Failed => (format!("✗ {}", result.status), Color::Red),
        _ => (result.status.to_string(), Color::Yellow),
    };
    table.add_row(vec![
        Cell::new("Status"),
        Cell::new(status_text).fg(color).add_attribute(Attribute::Bold),
    ]);
    table.add_row(vec!["Tenant", result.tenant_id.as_str()]);
    table.add_row(vec!["Job", result.job_id.as_str()]);
    table.add_row(vec!["Records", &result.total_records.to_string()]);
    table.add_row(vec!["Clustered", &result.clustered_records.to_string()]);
    table.add_row(vec!["Noise", &result.noise_records.to_string()]);
    table.add_row(vec!["Top-level topics", &result.num_clusters.to_string()]);
    table.add_row(vec!["Total topics", &result.topics.len().to_string()]);

    if let Some(completed) = result.completed_at {
        let elapsed = completed - result.started_at;
        let secs = elapsed.num_milliseconds() as f64 / 1000.0;
        table.add_row(vec!["Duration", &format!("{secs:.2}s")]);
    }
    if let Some(message) = &result.error_message {
        table.add_row(vec![
            Cell::new("Error"),
            Cell::new(message).fg(Color::Red),
        ]);
    }

    table.to_string()
}

/// Topics as an indented tree, children directly under their parent.
///
/// Topics whose parent is missing from `topics` are shown at the root.
pub fn create_topic_tree_table(topics: &[Topic]) -> String {
    let mut children: HashMap<Option<TopicId>, Vec<&Topic>> = HashMap::new();
    let known: std::collections::HashSet<TopicId> = topics.iter().map(|t| t.id).collect();
    for topic in topics {
        let parent = topic.parent_id.filter(|p| known.contains(p));
        children.entry(parent).or_default().push(topic);
    }

    let mut table = base_table();
    table.set_header(bold_cells(vec!["Topic", "Level", "Size", "Avg distance", "Id"]));

    let mut stack: Vec<(&Topic, usize)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|t| (*t, 0)).collect())
        .unwrap_or_default();
    while let Some((topic, depth)) = stack.pop() {
        let prefix = if depth == 0 {
            String::new()
        } else {
            format!("{}└ ", "  ".repeat(depth - 1))
        };
        let mut title = Cell::new(format!("{prefix}{}", topic.title));
        if depth == 0 {
            title = title.add_attribute(Attribute::Bold);
        }
        table.add_row(vec![
            title,
            Cell::new(topic.level),
            Cell::new(topic.cluster_size).fg(Color::Cyan),
            Cell::new(format!("{:.3}", topic.avg_distance)),
            Cell::new(topic.id).add_attribute(Attribute::Dim),
        ]);
        if let Some(kids) = children.get(&Some(topic.id)) {
            stack.extend(kids.iter().rev().map(|t| (*t, depth + 1)));
        }
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewTopic;

    fn topic(title: &str, level: u32, parent_id: Option<TopicId>) -> Topic {
        Topic::from_new(
            TopicId::new(),
            "acme",
            NewTopic {
                title: title.to_string(),
                description: String::new(),
                level,
                parent_id,
                cluster_size: 10,
                avg_distance: 0.25,
                embedding: None,
            },
        )
    }

    #[test]
    fn test_tree_places_children_under_parent() {
        let billing = topic("Billing", 1, None);
        let shipping = topic("Shipping", 1, None);
        let refunds = topic("Refunds", 2, Some(billing.id));
        let rendered = create_topic_tree_table(&[billing, shipping, refunds]);

        let billing_at = rendered.find("Billing").unwrap();
        let refunds_at = rendered.find("└ Refunds").unwrap();
        let shipping_at = rendered.find("Shipping").unwrap();
        assert!(billing_at < refunds_at);
        assert!(refunds_at < shipping_at);
    }

    #[test]
    fn test_orphan_topics_render_at_root() {
        let orphan = topic("Orphan", 2, Some(TopicId::new()));
        let rendered = create_topic_tree_table(&[orphan]);
        assert!(rendered.contains("Orphan"));
        assert!(!rendered.contains("└ Orphan"));
    }

    #[test]
    fn test_tree_lists_topic_ids() {
        let billing = topic("Billing", 1, None);
        let id = billing.id.to_string();
        let rendered = create_topic_tree_table(&[billing]);
        assert!(rendered.contains(&id));
    }
}

use serde_json::{Map, Value};

/// Atlassian Document Format node, as returned by the Jira v3 issue API in
/// description fields. Only the node kinds the hash extractor cares about are
/// modeled; everything else collapses into `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdfNode {
    Doc { content: Vec<AdfNode> },
    Paragraph { content: Vec<AdfNode> },
    Text { text: String },
    Other,
}

impl AdfNode {
    /// Total conversion from raw JSON. Malformed or unrecognized nodes become
    /// `Other` rather than an error, so callers can walk any payload Jira
    /// hands back without a failure path.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Other;
        };
        match object.get("type").and_then(Value::as_str) {
            Some("doc") => Self::Doc {
                content: child_nodes(object),
            },
            Some("paragraph") => Self::Paragraph {
                content: child_nodes(object),
            },
            Some("text") => Self::Text {
                text: object
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            _ => Self::Other,
        }
    }

    /// Concatenated text of the node's direct text runs. Nested block nodes
    /// do not contribute; a footer line is always a flat paragraph.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Doc { content } | Self::Paragraph { content } => content
                .iter()
                .filter_map(|node| match node {
                    Self::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
            Self::Other => String::new(),
        }
    }
}

fn child_nodes(object: &Map<String, Value>) -> Vec<AdfNode> {
    object
        .get("content")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(AdfNode::from_value).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AdfNode;

    #[test]
    fn parses_doc_with_paragraph_text() {
        let value = json!({
            "type": "doc",
            "version": 1,
            "content": [
                {
                    "type": "paragraph",
                    "content": [
                        {"type": "text", "text": "Hello "},
                        {"type": "text", "text": "world"}
                    ]
                }
            ]
        });
        let node = AdfNode::from_value(&value);
        let AdfNode::Doc { content } = &node else {
            panic!("expected doc node");
        };
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].plain_text(), "Hello world");
    }

    #[test]
    fn unknown_node_types_become_other() {
        let value = json!({
            "type": "codeBlock",
            "content": [{"type": "text", "text": "let x = 1;"}]
        });
        assert_eq!(AdfNode::from_value(&value), AdfNode::Other);
    }

    #[test]
    fn malformed_values_become_other() {
        assert_eq!(AdfNode::from_value(&json!(null)), AdfNode::Other);
        assert_eq!(AdfNode::from_value(&json!("just a string")), AdfNode::Other);
        assert_eq!(AdfNode::from_value(&json!([1, 2, 3])), AdfNode::Other);
        assert_eq!(AdfNode::from_value(&json!({"no_type": true})), AdfNode::Other);
    }

    #[test]
    fn paragraph_without_content_is_empty() {
        let value = json!({"type": "paragraph"});
        let node = AdfNode::from_value(&value);
        assert_eq!(node, AdfNode::Paragraph { content: vec![] });
        assert_eq!(node.plain_text(), "");
    }

    #[test]
    fn nested_blocks_do_not_contribute_text() {
        let value = json!({
            "type": "paragraph",
            "content": [
                {"type": "text", "text": "visible"},
                {"type": "paragraph", "content": [{"type": "text", "text": "nested"}]}
            ]
        });
        assert_eq!(AdfNode::from_value(&value).plain_text(), "visible");
    }
}

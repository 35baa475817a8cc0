//! Accessibility tree rendering.
//!
//! Converts Chrome's `Accessibility.getFullAXTree` response into the indentation-structured
//! aria text that responses carry (and that `aria::compact` later trims). Every rendered node
//! gets a deterministic ref (`e1`, `e2`, ...).

use serde_json::Value;
use std::collections::HashMap;

/// An accessibility node with ref annotation.
#[derive(Debug, Clone, Default)]
pub struct AXNode {
    pub role: String,
    pub name: String,
    pub value: String,
    pub ignored: bool,
    pub backend_node_id: Option<i64>,
    pub ref_id: Option<String>,
    pub children: Vec<AXNode>,
    pub focused: bool,
    pub checked: Option<bool>,
    pub disabled: bool,
    pub expanded: Option<bool>,
    pub level: Option<i64>,
}

/// Container roles that render as `generic`.
const STRUCTURAL_ROLES: &[&str] = &[
    "generic", "none", "presentation", "GenericContainer", "Section", "Div",
];

/// Document roots; their children are rendered at the top level.
const ROOT_ROLES: &[&str] = &["RootWebArea", "WebArea"];

const TEXT_ROLES: &[&str] = &["StaticText", "text"];

/// Parse the CDP accessibility tree response into our AXNode tree.
pub fn parse_ax_tree(cdp_response: &Value) -> Vec<AXNode> {
    let nodes = match cdp_response.get("nodes").and_then(|v| v.as_array()) {
        Some(arr) if !arr.is_empty() => arr,
        _ => return Vec::new(),
    };

    let mut node_map: HashMap<&str, &Value> = HashMap::new();
    for node in nodes {
        if let Some(id) = node.get("nodeId").and_then(|v| v.as_str()) {
            node_map.insert(id, node);
        }
    }

    let root_id = nodes[0].get("nodeId").and_then(|v| v.as_str()).unwrap_or("");
    match build_ax_node(root_id, &node_map) {
        Some(root) => vec![root],
        None => Vec::new(),
    }
}

fn build_ax_node(node_id: &str, node_map: &HashMap<&str, &Value>) -> Option<AXNode> {
    let node = *node_map.get(node_id)?;

    let mut ax = AXNode {
        role: get_ax_value(node, "role"),
        name: get_ax_value(node, "name"),
        value: get_ax_value(node, "value"),
        ignored: node.get("ignored").and_then(|v| v.as_bool()).unwrap_or(false),
        backend_node_id: node.get("backendDOMNodeId").and_then(|v| v.as_i64()),
        ..AXNode::default()
    };

    if let Some(props) = node.get("properties").and_then(|v| v.as_array()) {
        for prop in props {
            let prop_name = prop.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let prop_value = prop.get("value").and_then(|v| v.get("value"));
            match prop_name {
                "focused" => ax.focused = prop_value.and_then(|v| v.as_bool()).unwrap_or(false),
                "checked" => {
                    ax.checked = prop_value.map(|v| v.as_bool().unwrap_or(v.as_str() == Some("true")))
                }
                "disabled" => ax.disabled = prop_value.and_then(|v| v.as_bool()).unwrap_or(false),
                "expanded" => ax.expanded = prop_value.and_then(|v| v.as_bool()),
                "level" => ax.level = prop_value.and_then(|v| v.as_i64()),
                _ => {}
            }
        }
    }

    if let Some(child_ids) = node.get("childIds").and_then(|v| v.as_array()) {
        ax.children = child_ids
            .iter()
            .filter_map(|id| id.as_str())
            .filter_map(|id| build_ax_node(id, node_map))
            .collect();
    }

    Some(ax)
}

fn get_ax_value(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| {
            // CDP returns {type: "...", value: "..."} for role/name/value
            v.get("value")
                .and_then(|val| val.as_str())
                .or_else(|| v.as_str())
        })
        .unwrap_or("")
        .to_string()
}

/// Assign ref IDs to every node that will be rendered as an element line.
/// Returns the updated ref counter.
pub fn assign_refs(nodes: &mut [AXNode], start_counter: u32) -> u32 {
    let mut counter = start_counter;
    for node in nodes.iter_mut() {
        assign_refs_recursive(node, &mut counter);
    }
    counter
}

fn assign_refs_recursive(node: &mut AXNode, counter: &mut u32) {
    if !node.ignored && !is_text(node) && !is_root(node) {
        *counter += 1;
        node.ref_id = Some(format!("e{}", counter));
    }
    for child in node.children.iter_mut() {
        assign_refs_recursive(child, counter);
    }
}

fn is_text(node: &AXNode) -> bool {
    TEXT_ROLES.contains(&node.role.as_str()) || node.role == "InlineTextBox"
}

fn is_root(node: &AXNode) -> bool {
    ROOT_ROLES.contains(&node.role.as_str())
}

/// Whether `node` contributes at least one line under a parent named `parent_name`.
fn renders_output(node: &AXNode, parent_name: &str) -> bool {
    if node.ignored || is_root(node) {
        return node.children.iter().any(|c| renders_output(c, parent_name));
    }
    if is_text(node) {
        let text = node.name.trim();
        return node.role != "InlineTextBox" && !text.is_empty() && text != parent_name;
    }
    true
}

/// Render the tree as aria text: `- role "name" [attrs] [ref=eN]`, with a trailing `:`
/// on lines that have children and `- text: ...` for text runs.
pub fn render_aria(nodes: &[AXNode], max_depth: Option<usize>) -> String {
    let mut lines = Vec::new();
    for node in nodes {
        render_node(&mut lines, node, None, 0, max_depth);
    }
    lines.join("\n")
}

fn render_node(
    lines: &mut Vec<String>,
    node: &AXNode,
    parent_name: Option<&str>,
    indent: usize,
    max_depth: Option<usize>,
) {
    if max_depth.map_or(false, |max| indent > max) {
        return;
    }

    // Ignored and root nodes are transparent: their children take their place.
    if node.ignored || is_root(node) {
        for child in &node.children {
            render_node(lines, child, parent_name, indent, max_depth);
        }
        return;
    }

    let prefix = "  ".repeat(indent);

    if is_text(node) {
        let text = node.name.trim();
        if node.role != "InlineTextBox" && !text.is_empty() && Some(text) != parent_name {
            lines.push(format!("{}- text: {}", prefix, text));
        }
        return;
    }

    let role = if STRUCTURAL_ROLES.iter().any(|r| r.eq_ignore_ascii_case(&node.role)) {
        "generic"
    } else {
        node.role.as_str()
    };

    let mut line = format!("{}- {}", prefix, role);
    if !node.name.is_empty() {
        let name = if node.name.chars().count() > 80 {
            format!("{}...", node.name.chars().take(77).collect::<String>())
        } else {
            node.name.clone()
        };
        line.push_str(&format!(" \"{}\"", name.replace('"', "\\\"")));
    }
    if let Some(level) = node.level {
        line.push_str(&format!(" [level={}]", level));
    }
    if let Some(true) = node.checked {
        line.push_str(" [checked]");
    }
    if node.disabled {
        line.push_str(" [disabled]");
    }
    if let Some(expanded) = node.expanded {
        line.push_str(if expanded { " [expanded]" } else { " [collapsed]" });
    }
    if node.focused {
        line.push_str(" [active]");
    }
    if let Some(ref ref_id) = node.ref_id {
        line.push_str(&format!(" [ref={}]", ref_id));
    }

    let has_children = node.children.iter().any(|c| renders_output(c, &node.name));
    let value = node.value.trim();
    if !value.is_empty() && value != node.name {
        line.push_str(&format!(": {}", value));
    } else if has_children {
        line.push(':');
    }
    lines.push(line);

    let name = (!node.name.is_empty()).then_some(node.name.as_str());
    for child in &node.children {
        render_node(lines, child, name, indent + 1, max_depth);
    }
}

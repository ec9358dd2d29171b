//! ASCII tree rendering for member hierarchies.

use super::marker::TaskType;
use super::member::{Member, MemberKind};

const PROJECT: char = '◆';
const TASK_GROUP: char = '◇';
const TASK: char = '○';
const FOLDER: char = '▸';
const FILE: char = '•';

/// Get the symbol for a member kind.
fn kind_symbol(kind: &MemberKind) -> char {
    match kind {
        MemberKind::Task(TaskType::Project) => PROJECT,
        MemberKind::Task(TaskType::TaskGroup) => TASK_GROUP,
        MemberKind::Task(TaskType::Task(_)) => TASK,
        MemberKind::Folder => FOLDER,
        MemberKind::File => FILE,
    }
}

/// Render the in-memory tree below `root` as ASCII art.
///
/// Only what is already loaded is drawn; synchronize first for a fresh view.
///
/// Example output:
/// ```text
/// Game
/// ├── ▸ art
/// ├── ○ Deck
/// │   ├── • back.png
/// │   └── • front.png
/// └── • readme.txt
/// ```
pub fn render_tree(root: &Member) -> String {
    let mut output = String::new();
    render_node(&mut output, root, "", true, true);
    output
}

/// Recursively render a node and its children.
fn render_node(output: &mut String, node: &Member, prefix: &str, is_last: bool, is_root: bool) {
    if is_root {
        output.push_str(node.name());
        output.push('\n');
    } else {
        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
        output.push(kind_symbol(node.kind()));
        output.push(' ');
        output.push_str(node.name());
        output.push('\n');
    }

    let child_prefix = if is_root {
        String::new()
    } else {
        let continuation = if is_last { "    " } else { "│   " };
        format!("{}{}", prefix, continuation)
    };

    let children = node.children();
    for (i, child) in children.iter().enumerate() {
        let child_is_last = i == children.len() - 1;
        render_node(output, child, &child_prefix, child_is_last, false);
    }
}

//! Python language adapter.
//!
//! Emits the user solution verbatim as `solution.py` and a generated
//! `driver.py`. Python being dynamic, the driver is mostly a fixed
//! template: test inputs are embedded as a JSON payload, and a small
//! per-parameter builder table (computed at generation time from the
//! declared types) turns raw JSON values into linked lists, trees, or
//! graphs before the call. There is no compile phase.

use anyhow::{Context, Result, bail};

use super::shape::{CanonicalShape, concrete_name, detect_shape};
use super::{LanguageAdapter, SourceFile};
use crate::model::{QuestionType, SubmissionRequest};

/// Adapter for Python submissions. Runs the generated driver with
/// `python3`; the compile phase is a no-op.
#[derive(Debug, Clone)]
pub struct PythonAdapter {
    image: String,
}

impl PythonAdapter {
    pub fn new() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
        }
    }

    /// Override the toolchain image.
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Default for PythonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAdapter for PythonAdapter {
    fn name(&self) -> &str {
        "python"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn generate(&self, submission: &SubmissionRequest) -> Result<Vec<SourceFile>> {
        let driver = build_driver(submission).with_context(|| {
            format!(
                "failed to generate Python driver for {}",
                submission.question_id
            )
        })?;

        Ok(vec![
            SourceFile {
                relative_path: "solution.py".into(),
                contents: submission.code.clone(),
            },
            SourceFile {
                relative_path: "driver.py".into(),
                contents: driver,
            },
        ])
    }

    fn compile_argv(&self, _submission: &SubmissionRequest) -> Option<Vec<String>> {
        None
    }

    fn run_argv(&self, _submission: &SubmissionRequest) -> Vec<String> {
        vec!["python3".to_string(), "driver.py".to_string()]
    }
}

// ---------------------------------------------------------------------------
// Driver generation
// ---------------------------------------------------------------------------

/// Builder tag applied to one parameter before the call.
fn builder_tag(declared: &str, submission: &SubmissionRequest) -> Result<&'static str> {
    let custom = &submission.metadata.custom_data_structures;
    match detect_shape(declared, custom) {
        None => Ok("raw"),
        Some(b) => match (b.shape, b.batched) {
            (CanonicalShape::ListNode, false) => Ok("list_node"),
            (CanonicalShape::ListNode, true) => Ok("list_node_batch"),
            (CanonicalShape::TreeNode, false) => Ok("tree"),
            (CanonicalShape::TreeNode, true) => Ok("tree_batch"),
            (CanonicalShape::GraphNode, false) => Ok("graph"),
            (CanonicalShape::GraphNode, true) => {
                bail!("batched GraphNode parameters are not supported")
            }
        },
    }
}

fn py_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn build_driver(submission: &SubmissionRequest) -> Result<String> {
    let meta = &submission.metadata;
    let custom = &meta.custom_data_structures;

    let tests_json = serde_json::to_string(
        &submission
            .test_cases
            .iter()
            .map(|c| serde_json::Value::Object(c.input.clone()))
            .collect::<Vec<_>>(),
    )
    .context("failed to serialize test inputs")?;

    let param_builders = meta
        .parameters
        .iter()
        .map(|p| {
            let tag = builder_tag(&p.type_name, submission)?;
            Ok(format!("({}, \"{tag}\")", py_string_literal(&p.name)))
        })
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    // How the returned value is rendered.
    let return_mode = if meta.question_type == QuestionType::DesignClass {
        "design".to_string()
    } else if meta.return_type.trim() == "void"
        || meta.return_type.trim() == "None"
        || meta.return_type.trim().is_empty()
    {
        let target = meta.mutation_target.as_deref().with_context(|| {
            format!(
                "void-returning function {:?} needs a mutationTarget",
                meta.function_name
            )
        })?;
        let position = meta
            .parameters
            .iter()
            .position(|p| p.name == target)
            .with_context(|| format!("mutationTarget {target:?} does not name a parameter"))?;
        format!("mutate:{position}")
    } else {
        "value".to_string()
    };

    let list_name = concrete_name(CanonicalShape::ListNode, custom);
    let tree_name = concrete_name(CanonicalShape::TreeNode, custom);
    let graph_name = concrete_name(CanonicalShape::GraphNode, custom);

    let mut header = String::new();
    header.push_str("import json\n");
    header.push_str("import time\n\n");
    header.push_str("import solution\n\n");
    header.push_str(&format!("TESTS = json.loads({})\n", py_string_literal(&tests_json)));
    header.push_str(&format!("PARAM_BUILDERS = [{param_builders}]\n"));
    header.push_str(&format!(
        "FUNCTION_NAME = {}\n",
        py_string_literal(&meta.function_name)
    ));
    header.push_str(&format!("RETURN_MODE = {}\n", py_string_literal(&return_mode)));
    header.push_str("SEP = \"\\x1f\"\n\n");

    let template = DRIVER_TEMPLATE
        .replace("__LIST_NODE__", &list_name)
        .replace("__TREE_NODE__", &tree_name)
        .replace("__GRAPH_NODE__", &graph_name);

    Ok(format!("{header}{template}"))
}

/// The fixed part of the driver. Class names are substituted for
/// `customDataStructures` renames, and the classes are injected into the
/// solution module's namespace so user code can reference them.
const DRIVER_TEMPLATE: &str = r#"
class __LIST_NODE__:
    def __init__(self, val=0, next=None):
        self.val = val
        self.next = next


class __TREE_NODE__:
    def __init__(self, val=0, left=None, right=None):
        self.val = val
        self.left = left
        self.right = right


class __GRAPH_NODE__:
    def __init__(self, val=0, neighbors=None):
        self.val = val
        self.neighbors = neighbors if neighbors is not None else []


for _cls in (__LIST_NODE__, __TREE_NODE__, __GRAPH_NODE__):
    if not hasattr(solution, _cls.__name__):
        setattr(solution, _cls.__name__, _cls)


def build_list(values):
    head = None
    tail = None
    for v in values or []:
        node = __LIST_NODE__(v)
        if head is None:
            head = node
        else:
            tail.next = node
        tail = node
    return head


def build_tree(levels):
    if not levels or levels[0] is None:
        return None
    root = __TREE_NODE__(levels[0])
    queue = [root]
    i = 1
    while queue and i < len(levels):
        node = queue.pop(0)
        if i < len(levels):
            v = levels[i]
            i += 1
            if v is not None:
                node.left = __TREE_NODE__(v)
                queue.append(node.left)
        if i < len(levels):
            v = levels[i]
            i += 1
            if v is not None:
                node.right = __TREE_NODE__(v)
                queue.append(node.right)
    return root


def build_graph(adjacency):
    # Entry i lists the neighbors of node i+1, 1-indexed. Nodes first,
    # edges in a second pass.
    if not adjacency:
        return None
    nodes = [__GRAPH_NODE__(i + 1) for i in range(len(adjacency))]
    for i, row in enumerate(adjacency):
        nodes[i].neighbors = [nodes[n - 1] for n in row]
    return nodes[0]


def build_arg(tag, value):
    if tag == "raw":
        return value
    if value is None:
        return None
    if tag == "list_node":
        return build_list(value)
    if tag == "list_node_batch":
        return [build_list(v) for v in value]
    if tag == "tree":
        return build_tree(value)
    if tag == "tree_batch":
        return [build_tree(v) for v in value]
    if tag == "graph":
        return build_graph(value)
    raise ValueError("unknown builder tag: " + tag)


def list_values(head):
    out = []
    while head is not None:
        out.append(head.val)
        head = head.next
    return out


def tree_levels(root):
    out = []
    queue = [root]
    while queue:
        node = queue.pop(0)
        if node is None:
            out.append(None)
        else:
            out.append(node.val)
            queue.append(node.left)
            queue.append(node.right)
    while out and out[-1] is None:
        out.pop()
    return out


def graph_adjacency(start):
    if start is None:
        return []
    seen = {start.val: start}
    queue = [start]
    max_val = start.val
    while queue:
        node = queue.pop(0)
        max_val = max(max_val, node.val)
        for n in node.neighbors:
            if n.val not in seen:
                seen[n.val] = n
                queue.append(n)
    rows = []
    for v in range(1, max_val + 1):
        node = seen.get(v)
        rows.append([n.val for n in node.neighbors] if node is not None else [])
    return rows


def jsonable(value):
    if isinstance(value, __LIST_NODE__):
        return list_values(value)
    if isinstance(value, __TREE_NODE__):
        return tree_levels(value)
    if isinstance(value, __GRAPH_NODE__):
        return graph_adjacency(value)
    if isinstance(value, (list, tuple)):
        return [jsonable(v) for v in value]
    if isinstance(value, dict):
        return {k: jsonable(v) for k, v in value.items()}
    return value


def render(value):
    if value is None:
        return "null"
    if isinstance(value, str):
        return value
    if isinstance(value, bool):
        return "true" if value else "false"
    if isinstance(value, (int, float)):
        return json.dumps(value)
    return json.dumps(jsonable(value), separators=(",", ":"))


def emit(idx, output, ms, err):
    print("TEST_CASE_RESULT: " + SEP.join([str(idx), output, str(ms), err]))


def run_case(sol, idx):
    case = TESTS[idx]
    args = [build_arg(tag, case.get(name)) for name, tag in PARAM_BUILDERS]
    fn = getattr(sol, FUNCTION_NAME)
    t0 = time.perf_counter_ns()
    result = fn(*args)
    ms = (time.perf_counter_ns() - t0) // 1_000_000
    if RETURN_MODE.startswith("mutate:"):
        position = int(RETURN_MODE.split(":", 1)[1])
        return render(args[position]), ms
    return render(result), ms


def run_design_case(idx):
    case = TESTS[idx]
    ops = case["operations"]
    arg_lists = case["arguments"]
    cls = getattr(solution, FUNCTION_NAME)
    t0 = time.perf_counter_ns()
    target = cls(*arg_lists[0])
    results = [None]
    for name, call_args in zip(ops[1:], arg_lists[1:]):
        results.append(getattr(target, name)(*call_args))
    ms = (time.perf_counter_ns() - t0) // 1_000_000
    return json.dumps(jsonable(results), separators=(",", ":")), ms


def main():
    sol = None
    if RETURN_MODE != "design":
        sol = solution.Solution()
    for i in range(len(TESTS)):
        try:
            if RETURN_MODE == "design":
                output, ms = run_design_case(i)
            else:
                output, ms = run_case(sol, i)
            emit(i, output, ms, "")
        except BaseException as e:
            msg = str(e).replace("\n", " ").replace("\r", " ")
            emit(i, "", 0, type(e).__name__ + ": " + msg)


if __name__ == "__main__":
    main()
"#;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::tests::simple_submission;
    use serde_json::json;

    fn driver_for(submission: &SubmissionRequest) -> String {
        let files = PythonAdapter::new().generate(submission).unwrap();
        files
            .iter()
            .find(|f| f.relative_path.to_str() == Some("driver.py"))
            .unwrap()
            .contents
            .clone()
    }

    #[test]
    fn no_compile_phase() {
        let submission = simple_submission("python", "", "add", "int", &[], vec![]);
        assert!(PythonAdapter::new().compile_argv(&submission).is_none());
        assert_eq!(
            PythonAdapter::new().run_argv(&submission),
            vec!["python3", "driver.py"]
        );
    }

    #[test]
    fn solution_is_emitted_verbatim() {
        let code = "class Solution:\n    def add(self, a, b):\n        return a + b\n";
        let submission = simple_submission(
            "python",
            code,
            "add",
            "int",
            &[("a", "int"), ("b", "int")],
            vec![json!({"a": 1, "b": 2})],
        );
        let files = PythonAdapter::new().generate(&submission).unwrap();
        let solution = files
            .iter()
            .find(|f| f.relative_path.to_str() == Some("solution.py"))
            .unwrap();
        assert_eq!(solution.contents, code);
    }

    #[test]
    fn driver_embeds_tests_and_builders() {
        let submission = simple_submission(
            "python",
            "",
            "add",
            "int",
            &[("a", "int"), ("b", "int")],
            vec![json!({"a": 1, "b": 2}), json!({"a": -5, "b": 5})],
        );
        let driver = driver_for(&submission);

        assert!(driver.contains(r#"FUNCTION_NAME = "add""#));
        assert!(driver.contains(r#"RETURN_MODE = "value""#));
        assert!(driver.contains(r#"("a", "raw"), ("b", "raw")"#));
        assert!(driver.contains(r#"\"a\": 1"#) || driver.contains(r#"\"a\":1"#));
        assert!(driver.contains("TEST_CASE_RESULT: "));
    }

    #[test]
    fn shape_parameters_get_builder_tags() {
        let submission = simple_submission(
            "python",
            "",
            "cloneGraph",
            "GraphNode",
            &[("node", "GraphNode")],
            vec![json!({"node": [[2, 4], [1, 3], [2, 4], [1, 3]]})],
        );
        let driver = driver_for(&submission);
        assert!(driver.contains(r#"("node", "graph")"#));
    }

    #[test]
    fn batched_shapes_are_tagged() {
        let submission = simple_submission(
            "python",
            "",
            "mergeKLists",
            "ListNode",
            &[("lists", "List[ListNode]")],
            vec![json!({"lists": [[1, 4], [1, 3]]})],
        );
        let driver = driver_for(&submission);
        assert!(driver.contains(r#"("lists", "list_node_batch")"#));
    }

    #[test]
    fn custom_names_are_substituted_in_template() {
        let mut submission = simple_submission(
            "python",
            "",
            "cloneGraph",
            "Node",
            &[("node", "Node")],
            vec![json!({"node": [[2], [1]]})],
        );
        submission
            .metadata
            .custom_data_structures
            .insert("GraphNode".to_string(), "Node".to_string());
        let driver = driver_for(&submission);

        assert!(driver.contains("class Node:"));
        assert!(!driver.contains("class GraphNode:"));
        assert!(driver.contains(r#"("node", "graph")"#));
    }

    #[test]
    fn void_return_uses_mutation_target_position() {
        let mut submission = simple_submission(
            "python",
            "",
            "rotate",
            "void",
            &[("nums", "List[int]"), ("k", "int")],
            vec![json!({"nums": [1, 2, 3], "k": 1})],
        );
        submission.metadata.mutation_target = Some("nums".to_string());
        let driver = driver_for(&submission);
        assert!(driver.contains(r#"RETURN_MODE = "mutate:0""#));
    }

    #[test]
    fn design_class_mode() {
        let mut submission = simple_submission(
            "python",
            "",
            "MinStack",
            "void",
            &[],
            vec![json!({
                "operations": ["MinStack", "push", "top"],
                "arguments": [[], [5], []]
            })],
        );
        submission.metadata.question_type = QuestionType::DesignClass;
        let driver = driver_for(&submission);
        assert!(driver.contains(r#"RETURN_MODE = "design""#));
        assert!(driver.contains("run_design_case"));
    }

    #[test]
    fn missing_mutation_target_is_an_error() {
        let submission = simple_submission(
            "python",
            "",
            "rotate",
            "void",
            &[("nums", "List[int]")],
            vec![json!({"nums": [1]})],
        );
        let err = PythonAdapter::new().generate(&submission).unwrap_err();
        assert!(format!("{err:#}").contains("mutationTarget"));
    }

    #[test]
    fn python_string_literal_escapes() {
        assert_eq!(py_string_literal("a\"b\\c\nd"), r#""a\"b\\c\nd""#);
        assert_eq!(py_string_literal("\u{1f}"), r#""\x1f""#);
    }
}

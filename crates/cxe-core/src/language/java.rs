//! Java language adapter.
//!
//! Emits the user solution verbatim as `Solution.java` (in the declared
//! package) and a generated `Main.java` driver that rebuilds each test
//! case's typed inputs as Java literals, invokes the user function with
//! per-case timing, and prints one marker line per case. An exception in
//! user code terminates only that case; the driver exits non-zero only on
//! catastrophic harness errors.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use super::shape::{CanonicalShape, ShapeBinding, detect_shape};
use super::{LanguageAdapter, SourceFile};
use crate::model::{QuestionType, SubmissionRequest};

/// Adapter for Java submissions. Compiles with `javac` and runs the
/// generated `Main` class.
#[derive(Debug, Clone)]
pub struct JavaAdapter {
    image: String,
}

impl JavaAdapter {
    pub fn new() -> Self {
        Self {
            image: "eclipse-temurin:21-jdk".to_string(),
        }
    }

    /// Override the toolchain image.
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Default for JavaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAdapter for JavaAdapter {
    fn name(&self) -> &str {
        "java"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn generate(&self, submission: &SubmissionRequest) -> Result<Vec<SourceFile>> {
        let pkg = submission.metadata.package_or_namespace.trim();
        let solution = if pkg.is_empty() {
            submission.code.clone()
        } else {
            format!("package {pkg};\n\n{}", submission.code)
        };

        let driver = build_driver(submission)
            .with_context(|| format!("failed to generate Java driver for {}", submission.question_id))?;

        Ok(vec![
            SourceFile {
                relative_path: "Solution.java".into(),
                contents: solution,
            },
            SourceFile {
                relative_path: "Main.java".into(),
                contents: driver,
            },
        ])
    }

    fn compile_argv(&self, _submission: &SubmissionRequest) -> Option<Vec<String>> {
        Some(
            ["javac", "-encoding", "UTF-8", "-d", ".", "Main.java", "Solution.java"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
    }

    fn run_argv(&self, submission: &SubmissionRequest) -> Vec<String> {
        let pkg = submission.metadata.package_or_namespace.trim();
        let main_class = if pkg.is_empty() {
            "Main".to_string()
        } else {
            format!("{pkg}.Main")
        };
        vec!["java".to_string(), "-cp".to_string(), ".".to_string(), main_class]
    }
}

// ---------------------------------------------------------------------------
// Driver generation
// ---------------------------------------------------------------------------

fn build_driver(submission: &SubmissionRequest) -> Result<String> {
    let meta = &submission.metadata;
    let custom = &meta.custom_data_structures;
    let pkg = meta.package_or_namespace.trim();

    // Which canonical shapes appear anywhere in the signature.
    let mut used: Vec<CanonicalShape> = Vec::new();
    let mut mark = |binding: &Option<ShapeBinding>| {
        if let Some(b) = binding {
            if !used.contains(&b.shape) {
                used.push(b.shape);
            }
        }
    };
    for p in &meta.parameters {
        mark(&detect_shape(&p.type_name, custom));
    }
    mark(&detect_shape(&meta.return_type, custom));

    let mut cases = String::new();
    for idx in 0..submission.test_cases.len() {
        let body = match meta.question_type {
            QuestionType::Algorithm => algorithm_case(submission, idx)?,
            QuestionType::DesignClass => design_case(submission, idx)?,
        };
        cases.push_str(&body);
    }

    let mut out = String::new();
    if !pkg.is_empty() {
        out.push_str(&format!("package {pkg};\n\n"));
    }
    out.push_str("import java.util.*;\n\n");
    out.push_str(&main_class_source(submission, &cases));
    out.push_str(&out_class_source(&used, custom));
    if !used.is_empty() {
        out.push_str(&builders_source(&used, custom));
        out.push_str(&shape_class_sources(&used, custom));
    }
    Ok(out)
}

fn main_class_source(submission: &SubmissionRequest, cases: &str) -> String {
    let case_count = submission.test_cases.len();
    let needs_solution = submission.metadata.question_type == QuestionType::Algorithm;
    let (sol_decl, sol_param, sol_arg) = if needs_solution {
        (
            "        Solution sol = new Solution();\n",
            "Solution sol, ",
            "sol, ",
        )
    } else {
        ("", "", "")
    };

    format!(
        r#"public class Main {{
    private static final char SEP = '\u001f';

    public static void main(String[] args) {{
{sol_decl}        for (int i = 0; i < {case_count}; i++) {{
            try {{
                Outcome o = runCase({sol_arg}i);
                emit(i, o.output, o.durationMs, "");
            }} catch (Throwable t) {{
                emit(i, "", 0, describe(t));
            }}
        }}
    }}

    private static Outcome runCase({sol_param}int idx) throws Throwable {{
        switch (idx) {{
{cases}        default:
            throw new IllegalStateException("no such test case: " + idx);
        }}
    }}

    private static void emit(int idx, String output, long ms, String err) {{
        StringBuilder sb = new StringBuilder("TEST_CASE_RESULT: ");
        sb.append(idx).append(SEP).append(output).append(SEP).append(ms).append(SEP).append(err);
        System.out.println(sb.toString());
    }}

    private static String describe(Throwable t) {{
        String msg = t.getMessage() == null ? "" : t.getMessage();
        msg = msg.replace('\n', ' ').replace('\r', ' ');
        return t.getClass().getSimpleName() + ": " + msg;
    }}

    private static final class Outcome {{
        final String output;
        final long durationMs;

        Outcome(String output, long durationMs) {{
            this.output = output;
            this.durationMs = durationMs;
        }}
    }}
}}

"#
    )
}

/// One `case N:` block for an ALGORITHM submission: build typed arguments,
/// time the call, render the result.
fn algorithm_case(submission: &SubmissionRequest, idx: usize) -> Result<String> {
    let meta = &submission.metadata;
    let custom = &meta.custom_data_structures;
    let case = &submission.test_cases[idx];

    let mut body = format!("        case {idx}: {{\n");
    for param in &meta.parameters {
        let value = case.input.get(&param.name).unwrap_or(&Value::Null);
        let decl_ty = declared_java_type(&param.type_name, custom);
        let expr = value_expr(&param.type_name, value, custom).with_context(|| {
            format!("test case {idx}: parameter {:?} of type {:?}", param.name, param.type_name)
        })?;
        body.push_str(&format!("            {decl_ty} {} = {expr};\n", param.name));
    }

    let arg_list = meta
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    body.push_str("            long t0 = System.nanoTime();\n");
    if meta.return_type.trim() == "void" {
        let target = meta.mutation_target.as_deref().with_context(|| {
            format!("void-returning function {:?} needs a mutationTarget", meta.function_name)
        })?;
        if !meta.parameters.iter().any(|p| p.name == target) {
            bail!("mutationTarget {target:?} does not name a parameter");
        }
        body.push_str(&format!("            sol.{}({arg_list});\n", meta.function_name));
        body.push_str("            long ms = (System.nanoTime() - t0) / 1000000L;\n");
        body.push_str(&format!("            return new Outcome(Out.render({target}), ms);\n"));
    } else {
        let ret_ty = declared_java_type(&meta.return_type, custom);
        body.push_str(&format!(
            "            {ret_ty} result = sol.{}({arg_list});\n",
            meta.function_name
        ));
        body.push_str("            long ms = (System.nanoTime() - t0) / 1000000L;\n");
        body.push_str("            return new Outcome(Out.render(result), ms);\n");
    }
    body.push_str("        }\n");
    Ok(body)
}

/// One `case N:` block for a DESIGN_CLASS submission: the input carries
/// `operations` and `arguments`; index 0 is the constructor, the rest are
/// method calls resolved reflectively. One marker per sequence, with a
/// JSON vector of results (null for void operations).
fn design_case(submission: &SubmissionRequest, idx: usize) -> Result<String> {
    let meta = &submission.metadata;
    let case = &submission.test_cases[idx];

    let ops = case
        .input
        .get("operations")
        .and_then(Value::as_array)
        .with_context(|| format!("test case {idx}: DESIGN_CLASS input needs an \"operations\" array"))?;
    let args = case
        .input
        .get("arguments")
        .and_then(Value::as_array)
        .with_context(|| format!("test case {idx}: DESIGN_CLASS input needs an \"arguments\" array"))?;
    if ops.is_empty() || ops.len() != args.len() {
        bail!("test case {idx}: operations and arguments must be equal-length and non-empty");
    }

    let op_literals = ops
        .iter()
        .map(|op| {
            op.as_str()
                .map(java_string_literal)
                .with_context(|| format!("test case {idx}: operation names must be strings"))
        })
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let arg_literals = args
        .iter()
        .map(|arg_list| {
            let elems = arg_list
                .as_array()
                .with_context(|| format!("test case {idx}: each arguments entry must be an array"))?
                .iter()
                .map(object_expr)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("{{{}}}", elems.join(", ")))
        })
        .collect::<Result<Vec<String>>>()?
        .join(", ");

    let pkg = meta.package_or_namespace.trim();
    let class_name = if pkg.is_empty() {
        meta.function_name.clone()
    } else {
        format!("{pkg}.{}", meta.function_name)
    };

    Ok(format!(
        r#"        case {idx}: {{
            String[] ops = new String[]{{{op_literals}}};
            Object[][] opArgs = new Object[][]{{{arg_literals}}};
            long t0 = System.nanoTime();
            Object target = Out.construct({class}, opArgs[0]);
            List<Object> results = new ArrayList<>();
            results.add(null);
            for (int k = 1; k < ops.length; k++) {{
                results.add(Out.invoke(target, ops[k], opArgs[k]));
            }}
            long ms = (System.nanoTime() - t0) / 1000000L;
            return new Outcome(Out.json(results), ms);
        }}
"#,
        class = java_string_literal(&class_name),
    ))
}

// ---------------------------------------------------------------------------
// Literal construction
// ---------------------------------------------------------------------------

/// The Java type used for a local variable holding this parameter.
fn declared_java_type(ty: &str, custom: &HashMap<String, String>) -> String {
    let ty = ty.trim();
    if let Some(binding) = detect_shape(ty, custom) {
        if binding.batched {
            if ty.ends_with("[]") {
                return format!("{}[]", binding.concrete_name);
            }
            return format!("List<{}>", binding.concrete_name);
        }
        return binding.concrete_name;
    }
    ty.to_string()
}

/// A Java expression rebuilding `value` as the declared type.
fn value_expr(ty: &str, value: &Value, custom: &HashMap<String, String>) -> Result<String> {
    let ty = ty.trim();

    if let Some(binding) = detect_shape(ty, custom) {
        if value.is_null() {
            return Ok("null".to_string());
        }
        return shape_expr(&binding, ty, value);
    }

    match ty {
        "int" | "Integer" => Ok(json_i64(value)?.to_string()),
        "long" | "Long" => Ok(format!("{}L", json_i64(value)?)),
        "double" | "Double" => Ok(double_literal(value)?),
        "float" | "Float" => Ok(format!("{}f", json_f64(value)?)),
        "boolean" | "Boolean" => value
            .as_bool()
            .map(|b| b.to_string())
            .context("expected a boolean"),
        "String" | "string" => value
            .as_str()
            .map(java_string_literal)
            .context("expected a string"),
        "char" | "Character" => {
            let s = value.as_str().context("expected a one-character string")?;
            let c = s.chars().next().context("expected a non-empty string")?;
            Ok(format!("'{}'", escape_char(c)))
        }
        "int[]" => int_array_literal(value),
        "int[][]" => int_matrix_literal(value),
        "long[]" => {
            let elems = elements(value)?
                .iter()
                .map(|v| Ok(format!("{}L", json_i64(v)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("new long[]{{{}}}", elems.join(", ")))
        }
        "double[]" => {
            let elems = elements(value)?
                .iter()
                .map(double_literal)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("new double[]{{{}}}", elems.join(", ")))
        }
        "boolean[]" => {
            let elems = elements(value)?
                .iter()
                .map(|v| v.as_bool().map(|b| b.to_string()).context("expected a boolean"))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("new boolean[]{{{}}}", elems.join(", ")))
        }
        "String[]" => {
            let elems = elements(value)?
                .iter()
                .map(|v| v.as_str().map(java_string_literal).context("expected a string"))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("new String[]{{{}}}", elems.join(", ")))
        }
        "char[]" => {
            let elems = elements(value)?
                .iter()
                .map(|v| {
                    let s = v.as_str().context("expected a one-character string")?;
                    let c = s.chars().next().context("expected a non-empty string")?;
                    Ok(format!("'{}'", escape_char(c)))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("new char[]{{{}}}", elems.join(", ")))
        }
        _ => {
            if let Some(inner) = generic_inner(ty, "List") {
                let elems = elements(value)?
                    .iter()
                    .map(|v| value_expr(inner, v, custom))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(format!("Arrays.asList({})", elems.join(", ")));
            }
            bail!("unsupported Java parameter type {ty:?}")
        }
    }
}

/// Builder invocation for a canonical shape.
fn shape_expr(binding: &ShapeBinding, declared: &str, value: &Value) -> Result<String> {
    match (binding.shape, binding.batched) {
        (CanonicalShape::ListNode, false) => {
            Ok(format!("Builders.buildList({})", int_array_literal(value)?))
        }
        (CanonicalShape::ListNode, true) => {
            let batch = format!("Builders.buildListBatch({})", int_matrix_literal(value)?);
            Ok(wrap_batch(declared, batch))
        }
        (CanonicalShape::TreeNode, false) => {
            Ok(format!("Builders.buildTree({})", integer_levels_literal(value)?))
        }
        (CanonicalShape::TreeNode, true) => {
            let rows = elements(value)?
                .iter()
                .map(integer_levels_literal)
                .collect::<Result<Vec<_>>>()?;
            let batch = format!(
                "Builders.buildTreeBatch(new Integer[][]{{{}}})",
                rows.iter()
                    .map(|r| r.trim_start_matches("new Integer[]").to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(wrap_batch(declared, batch))
        }
        (CanonicalShape::GraphNode, false) => {
            Ok(format!("Builders.buildGraph({})", int_matrix_literal(value)?))
        }
        (CanonicalShape::GraphNode, true) => {
            bail!("batched GraphNode parameters are not supported")
        }
    }
}

/// Batched builders return arrays; wrap in `Arrays.asList` when the
/// declared type was the `List<...>` form.
fn wrap_batch(declared: &str, batch_expr: String) -> String {
    if declared.trim().ends_with("[]") {
        batch_expr
    } else {
        format!("Arrays.asList({batch_expr})")
    }
}

/// An `Object` expression for DESIGN_CLASS argument vectors.
fn object_expr(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(format!("Boolean.valueOf({b})")),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i32::try_from(i).is_ok() {
                    Ok(format!("Integer.valueOf({i})"))
                } else {
                    Ok(format!("Long.valueOf({i}L)"))
                }
            } else {
                Ok(format!("Double.valueOf({})", n))
            }
        }
        Value::String(s) => Ok(java_string_literal(s)),
        Value::Array(items) => {
            if items.iter().all(|v| v.as_i64().is_some()) {
                int_array_literal(value)
            } else {
                let elems = items.iter().map(object_expr).collect::<Result<Vec<_>>>()?;
                Ok(format!("new Object[]{{{}}}", elems.join(", ")))
            }
        }
        Value::Object(_) => bail!("JSON objects are not supported as design-class arguments"),
    }
}

fn elements(value: &Value) -> Result<&Vec<Value>> {
    value.as_array().context("expected a JSON array")
}

fn json_i64(value: &Value) -> Result<i64> {
    value.as_i64().context("expected an integer")
}

fn json_f64(value: &Value) -> Result<f64> {
    value.as_f64().context("expected a number")
}

fn double_literal(value: &Value) -> Result<String> {
    let f = json_f64(value)?;
    let s = f.to_string();
    if s.contains('.') || s.contains('e') || s.contains('E') {
        Ok(s)
    } else {
        Ok(format!("{s}.0"))
    }
}

fn int_array_literal(value: &Value) -> Result<String> {
    let elems = elements(value)?
        .iter()
        .map(|v| Ok(json_i64(v)?.to_string()))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("new int[]{{{}}}", elems.join(", ")))
}

fn int_matrix_literal(value: &Value) -> Result<String> {
    let rows = elements(value)?
        .iter()
        .map(|row| {
            let elems = elements(row)?
                .iter()
                .map(|v| Ok(json_i64(v)?.to_string()))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("{{{}}}", elems.join(", ")))
        })
        .collect::<Result<Vec<String>>>()?;
    Ok(format!("new int[][]{{{}}}", rows.join(", ")))
}

/// Level-order tree encoding: `Integer[]` with nulls for missing children.
fn integer_levels_literal(value: &Value) -> Result<String> {
    let elems = elements(value)?
        .iter()
        .map(|v| match v {
            Value::Null => Ok("null".to_string()),
            other => Ok(json_i64(other)?.to_string()),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("new Integer[]{{{}}}", elems.join(", ")))
}

fn java_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn escape_char(c: char) -> String {
    match c {
        '\'' => "\\'".to_string(),
        '\\' => "\\\\".to_string(),
        c => c.to_string(),
    }
}

fn generic_inner<'a>(ty: &'a str, name: &str) -> Option<&'a str> {
    let rest = ty.strip_prefix(name)?;
    let inner = rest.trim_start().strip_prefix('<')?.strip_suffix('>')?;
    Some(inner.trim())
}

// ---------------------------------------------------------------------------
// Emitted helper classes
// ---------------------------------------------------------------------------

fn shape_names(
    used: &[CanonicalShape],
    custom: &HashMap<String, String>,
) -> (Option<String>, Option<String>, Option<String>) {
    let name = |shape: CanonicalShape| {
        used.contains(&shape)
            .then(|| super::shape::concrete_name(shape, custom))
    };
    (
        name(CanonicalShape::ListNode),
        name(CanonicalShape::TreeNode),
        name(CanonicalShape::GraphNode),
    )
}

fn out_class_source(used: &[CanonicalShape], custom: &HashMap<String, String>) -> String {
    let (list, tree, graph) = shape_names(used, custom);

    let mut render_shapes = String::new();
    let mut json_shapes = String::new();
    let mut shape_helpers = String::new();

    if let Some(graph) = &graph {
        render_shapes.push_str(&format!(
            "        if (v instanceof {graph}) return graphAdjacency(({graph}) v);\n"
        ));
        json_shapes.push_str(&format!(
            "        if (v instanceof {graph}) {{ sb.append(graphAdjacency(({graph}) v)); return; }}\n"
        ));
        shape_helpers.push_str(&format!(
            r#"    static String graphAdjacency({graph} start) {{
        if (start == null) return "[]";
        Map<Integer, {graph}> seen = new HashMap<>();
        ArrayDeque<{graph}> queue = new ArrayDeque<>();
        queue.add(start);
        seen.put(start.val, start);
        int max = start.val;
        while (!queue.isEmpty()) {{
            {graph} node = queue.poll();
            if (node.val > max) max = node.val;
            for ({graph} n : node.neighbors) {{
                if (!seen.containsKey(n.val)) {{
                    seen.put(n.val, n);
                    queue.add(n);
                }}
            }}
        }}
        StringBuilder sb = new StringBuilder("[");
        for (int v = 1; v <= max; v++) {{
            if (v > 1) sb.append(',');
            sb.append('[');
            {graph} node = seen.get(v);
            if (node != null) {{
                for (int i = 0; i < node.neighbors.size(); i++) {{
                    if (i > 0) sb.append(',');
                    sb.append(node.neighbors.get(i).val);
                }}
            }}
            sb.append(']');
        }}
        sb.append(']');
        return sb.toString();
    }}

"#
        ));
    }

    if let Some(list) = &list {
        json_shapes.push_str(&format!(
            "        if (v instanceof {list}) {{ writeJson(sb, listValues(({list}) v)); return; }}\n"
        ));
        shape_helpers.push_str(&format!(
            r#"    static List<Integer> listValues({list} head) {{
        List<Integer> out = new ArrayList<>();
        for ({list} cur = head; cur != null; cur = cur.next) {{
            out.add(cur.val);
        }}
        return out;
    }}

"#
        ));
    }

    if let Some(tree) = &tree {
        json_shapes.push_str(&format!(
            "        if (v instanceof {tree}) {{ writeJson(sb, treeLevels(({tree}) v)); return; }}\n"
        ));
        shape_helpers.push_str(&format!(
            r#"    static List<Integer> treeLevels({tree} root) {{
        List<Integer> out = new ArrayList<>();
        LinkedList<{tree}> queue = new LinkedList<>();
        queue.add(root);
        while (!queue.isEmpty()) {{
            {tree} node = queue.poll();
            if (node == null) {{
                out.add(null);
            }} else {{
                out.add(node.val);
                queue.add(node.left);
                queue.add(node.right);
            }}
        }}
        while (!out.isEmpty() && out.get(out.size() - 1) == null) {{
            out.remove(out.size() - 1);
        }}
        return out;
    }}

"#
        ));
    }

    format!(
        r#"final class Out {{
    static String render(Object v) {{
        if (v == null) return "null";
        if (v instanceof String) return (String) v;
        if (v instanceof Boolean || v instanceof Number || v instanceof Character) {{
            return String.valueOf(v);
        }}
{render_shapes}        return json(v);
    }}

    static String json(Object v) {{
        StringBuilder sb = new StringBuilder();
        writeJson(sb, v);
        return sb.toString();
    }}

    static void writeJson(StringBuilder sb, Object v) {{
        if (v == null) {{ sb.append("null"); return; }}
        if (v instanceof String) {{ writeString(sb, (String) v); return; }}
        if (v instanceof Character) {{ writeString(sb, String.valueOf(v)); return; }}
        if (v instanceof Boolean || v instanceof Number) {{ sb.append(String.valueOf(v)); return; }}
{json_shapes}        if (v instanceof int[]) {{
            int[] a = (int[]) v;
            sb.append('[');
            for (int i = 0; i < a.length; i++) {{
                if (i > 0) sb.append(',');
                sb.append(a[i]);
            }}
            sb.append(']');
            return;
        }}
        if (v instanceof long[]) {{
            long[] a = (long[]) v;
            sb.append('[');
            for (int i = 0; i < a.length; i++) {{
                if (i > 0) sb.append(',');
                sb.append(a[i]);
            }}
            sb.append(']');
            return;
        }}
        if (v instanceof double[]) {{
            double[] a = (double[]) v;
            sb.append('[');
            for (int i = 0; i < a.length; i++) {{
                if (i > 0) sb.append(',');
                sb.append(a[i]);
            }}
            sb.append(']');
            return;
        }}
        if (v instanceof boolean[]) {{
            boolean[] a = (boolean[]) v;
            sb.append('[');
            for (int i = 0; i < a.length; i++) {{
                if (i > 0) sb.append(',');
                sb.append(a[i]);
            }}
            sb.append(']');
            return;
        }}
        if (v instanceof Object[]) {{
            Object[] a = (Object[]) v;
            sb.append('[');
            for (int i = 0; i < a.length; i++) {{
                if (i > 0) sb.append(',');
                writeJson(sb, a[i]);
            }}
            sb.append(']');
            return;
        }}
        if (v instanceof Map) {{
            sb.append('{{');
            boolean first = true;
            for (Map.Entry<?, ?> e : ((Map<?, ?>) v).entrySet()) {{
                if (!first) sb.append(',');
                first = false;
                writeString(sb, String.valueOf(e.getKey()));
                sb.append(':');
                writeJson(sb, e.getValue());
            }}
            sb.append('}}');
            return;
        }}
        if (v instanceof Iterable) {{
            sb.append('[');
            boolean first = true;
            for (Object item : (Iterable<?>) v) {{
                if (!first) sb.append(',');
                first = false;
                writeJson(sb, item);
            }}
            sb.append(']');
            return;
        }}
        writeString(sb, String.valueOf(v));
    }}

    static void writeString(StringBuilder sb, String s) {{
        sb.append('"');
        for (int i = 0; i < s.length(); i++) {{
            char c = s.charAt(i);
            switch (c) {{
            case '"': sb.append("\\\""); break;
            case '\\': sb.append("\\\\"); break;
            case '\n': sb.append("\\n"); break;
            case '\r': sb.append("\\r"); break;
            case '\t': sb.append("\\t"); break;
            default:
                if (c < 0x20) {{
                    sb.append(String.format("\\u%04x", (int) c));
                }} else {{
                    sb.append(c);
                }}
            }}
        }}
        sb.append('"');
    }}

{shape_helpers}    static Object construct(String className, Object[] args) throws Exception {{
        Class<?> cls = Class.forName(className);
        for (java.lang.reflect.Constructor<?> ctor : cls.getDeclaredConstructors()) {{
            if (ctor.getParameterCount() == args.length) {{
                ctor.setAccessible(true);
                return ctor.newInstance(coerceAll(args, ctor.getParameterTypes()));
            }}
        }}
        throw new NoSuchMethodException(className + " constructor/" + args.length);
    }}

    static Object invoke(Object target, String name, Object[] args) throws Throwable {{
        for (java.lang.reflect.Method m : target.getClass().getMethods()) {{
            if (m.getName().equals(name) && m.getParameterCount() == args.length) {{
                try {{
                    return m.invoke(target, coerceAll(args, m.getParameterTypes()));
                }} catch (java.lang.reflect.InvocationTargetException e) {{
                    throw e.getCause();
                }}
            }}
        }}
        throw new NoSuchMethodException(name + "/" + args.length);
    }}

    static Object[] coerceAll(Object[] args, Class<?>[] types) {{
        Object[] out = new Object[args.length];
        for (int i = 0; i < args.length; i++) {{
            out[i] = coerce(args[i], types[i]);
        }}
        return out;
    }}

    static Object coerce(Object arg, Class<?> type) {{
        if (arg instanceof Number) {{
            Number n = (Number) arg;
            if (type == int.class || type == Integer.class) return n.intValue();
            if (type == long.class || type == Long.class) return n.longValue();
            if (type == double.class || type == Double.class) return n.doubleValue();
        }}
        return arg;
    }}
}}

"#
    )
}

fn builders_source(used: &[CanonicalShape], custom: &HashMap<String, String>) -> String {
    let (list, tree, graph) = shape_names(used, custom);
    let mut body = String::new();

    if let Some(list) = &list {
        body.push_str(&format!(
            r#"    static {list} buildList(int[] vals) {{
        {list} dummy = new {list}(0);
        {list} cur = dummy;
        for (int v : vals) {{
            cur.next = new {list}(v);
            cur = cur.next;
        }}
        return dummy.next;
    }}

    static {list}[] buildListBatch(int[][] batch) {{
        {list}[] out = new {list}[batch.length];
        for (int i = 0; i < batch.length; i++) {{
            out[i] = buildList(batch[i]);
        }}
        return out;
    }}

"#
        ));
    }

    if let Some(tree) = &tree {
        body.push_str(&format!(
            r#"    static {tree} buildTree(Integer[] levels) {{
        if (levels.length == 0 || levels[0] == null) return null;
        {tree} root = new {tree}(levels[0]);
        LinkedList<{tree}> queue = new LinkedList<>();
        queue.add(root);
        int i = 1;
        while (!queue.isEmpty() && i < levels.length) {{
            {tree} node = queue.poll();
            if (i < levels.length) {{
                Integer v = levels[i++];
                if (v != null) {{
                    node.left = new {tree}(v);
                    queue.add(node.left);
                }}
            }}
            if (i < levels.length) {{
                Integer v = levels[i++];
                if (v != null) {{
                    node.right = new {tree}(v);
                    queue.add(node.right);
                }}
            }}
        }}
        return root;
    }}

    static {tree}[] buildTreeBatch(Integer[][] batch) {{
        {tree}[] out = new {tree}[batch.length];
        for (int i = 0; i < batch.length; i++) {{
            out[i] = buildTree(batch[i]);
        }}
        return out;
    }}

"#
        ));
    }

    if let Some(graph) = &graph {
        // Adjacency entry i lists the neighbors of node i+1 (1-indexed).
        // Nodes are built first, edges resolved in a second pass.
        body.push_str(&format!(
            r#"    static {graph} buildGraph(int[][] adjacency) {{
        if (adjacency.length == 0) return null;
        {graph}[] nodes = new {graph}[adjacency.length];
        for (int i = 0; i < adjacency.length; i++) {{
            nodes[i] = new {graph}(i + 1);
        }}
        for (int i = 0; i < adjacency.length; i++) {{
            for (int neighbor : adjacency[i]) {{
                nodes[i].neighbors.add(nodes[neighbor - 1]);
            }}
        }}
        return nodes[0];
    }}

"#
        ));
    }

    format!("final class Builders {{\n{body}}}\n\n")
}

fn shape_class_sources(used: &[CanonicalShape], custom: &HashMap<String, String>) -> String {
    let (list, tree, graph) = shape_names(used, custom);
    let mut out = String::new();

    if let Some(list) = &list {
        out.push_str(&format!(
            r#"class {list} {{
    int val;
    {list} next;

    {list}() {{}}

    {list}(int val) {{
        this.val = val;
    }}

    {list}(int val, {list} next) {{
        this.val = val;
        this.next = next;
    }}
}}

"#
        ));
    }

    if let Some(tree) = &tree {
        out.push_str(&format!(
            r#"class {tree} {{
    int val;
    {tree} left;
    {tree} right;

    {tree}() {{}}

    {tree}(int val) {{
        this.val = val;
    }}

    {tree}(int val, {tree} left, {tree} right) {{
        this.val = val;
        this.left = left;
        this.right = right;
    }}
}}

"#
        ));
    }

    if let Some(graph) = &graph {
        out.push_str(&format!(
            r#"class {graph} {{
    public int val;
    public List<{graph}> neighbors;

    public {graph}() {{
        neighbors = new ArrayList<>();
    }}

    public {graph}(int val) {{
        this();
        this.val = val;
    }}
}}

"#
        ));
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

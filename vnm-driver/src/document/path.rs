//! Path queries over a parsed VM description.
//!
//! The grammar is the small XPath subset the network drivers rely on:
//!
//! ```text
//! TEMPLATE/NIC                      children by name, relative to the context
//! /VM/TEMPLATE/NIC                  absolute, first step matches the root
//! //NIC                             any depth (root included)
//! TEMPLATE//*                       any depth below TEMPLATE
//! TEMPLATE/NIC[ICMP|WHITE_PORTS_TCP]  has a child named ICMP or WHITE_PORTS_TCP
//! devices/interface[@type='bridge'] attribute equals literal
//! devices/interface[@type]          attribute present
//! TEMPLATE/NIC[2]                   1-based position per context element
//! ```
//!
//! A path that does not follow the grammar matches nothing.

use std::collections::HashSet;

use tracing::debug;

use super::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Any,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    HasChild(Vec<String>),
    HasAttribute(String),
    AttributeEquals(String, String),
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Path {
    absolute: bool,
    steps: Vec<Step>,
}

/// Evaluate `path` against `context`, returning matches in document order.
pub fn select<'a>(context: &'a Element, path: &str) -> Vec<&'a Element> {
    let Some(parsed) = parse(path) else {
        debug!(path = %path, "Ignoring malformed path");
        return Vec::new();
    };

    let mut steps = parsed.steps.iter();
    let mut current: Vec<&'a Element> = if parsed.absolute {
        // The first step is taken from the (implicit) document node.
        let Some(first) = steps.next() else {
            return Vec::new();
        };
        let candidates = match first.axis {
            Axis::Child => vec![context],
            Axis::Descendant => {
                let mut all = vec![context];
                collect_descendants(context, &mut all);
                all
            }
        };
        apply_test(first, candidates)
    } else {
        vec![context]
    };

    for step in steps {
        let mut next: Vec<&'a Element> = Vec::new();
        // Nested context nodes reach the same descendants more than once
        let mut seen: HashSet<*const Element> = HashSet::new();
        for &node in &current {
            let candidates = match (&step.test, step.axis) {
                (NodeTest::Context, Axis::Child) => vec![node],
                (NodeTest::Context, Axis::Descendant) => {
                    let mut all = vec![node];
                    collect_descendants(node, &mut all);
                    all
                }
                (_, Axis::Child) => node.children().iter().collect(),
                (_, Axis::Descendant) => {
                    let mut all = Vec::new();
                    collect_descendants(node, &mut all);
                    all
                }
            };
            for found in apply_test(step, candidates) {
                if seen.insert(found as *const Element) {
                    next.push(found);
                }
            }
        }
        current = next;
    }

    current
}

fn collect_descendants<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    for child in element.children() {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn apply_test<'a>(step: &Step, candidates: Vec<&'a Element>) -> Vec<&'a Element> {
    let mut matched: Vec<&'a Element> = candidates
        .into_iter()
        .filter(|el| match &step.test {
            NodeTest::Name(name) => el.name() == name,
            NodeTest::Any | NodeTest::Context => true,
        })
        .collect();

    for predicate in &step.predicates {
        matched = match predicate {
            Predicate::Position(n) => matched.get(n - 1).copied().into_iter().collect(),
            other => matched.into_iter().filter(|el| holds(other, el)).collect(),
        };
    }

    matched
}

fn holds(predicate: &Predicate, element: &Element) -> bool {
    match predicate {
        Predicate::HasChild(names) => element
            .children()
            .iter()
            .any(|child| names.iter().any(|n| n == child.name())),
        Predicate::HasAttribute(key) => element.attribute(key).is_some(),
        Predicate::AttributeEquals(key, value) => element.attribute(key) == Some(value.as_str()),
        Predicate::Position(_) => true,
    }
}

// =============================================================================
// PARSING
// =============================================================================

fn parse(path: &str) -> Option<Path> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let absolute = path.starts_with('/');
    let segments = split_steps(path.strip_prefix('/').unwrap_or(path))?;

    let mut steps = Vec::new();
    let mut axis = Axis::Child;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            // "a//b" (or a leading "//") yields an empty segment
            if axis == Axis::Descendant || i == segments.len() - 1 {
                return None;
            }
            axis = Axis::Descendant;
            continue;
        }
        steps.push(parse_step(segment, axis)?);
        axis = Axis::Child;
    }

    if steps.is_empty() {
        return None;
    }

    Some(Path { absolute, steps })
}

/// Split on '/' outside of brackets and quotes.
fn split_steps(path: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in path.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                depth = depth.checked_sub(1)?;
                current.push(c);
            }
            (None, '/') if depth == 0 => segments.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }

    if depth != 0 || quote.is_some() {
        return None;
    }
    segments.push(current);
    Some(segments)
}

fn parse_step(segment: &str, axis: Axis) -> Option<Step> {
    let (head, mut rest) = match segment.find('[') {
        Some(idx) => segment.split_at(idx),
        None => (segment, ""),
    };

    let test = match head.trim() {
        "*" => NodeTest::Any,
        "." => NodeTest::Context,
        name if is_name(name) => NodeTest::Name(name.to_string()),
        _ => return None,
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let body_end = closing_bracket(rest)?;
        predicates.push(parse_predicate(&rest[1..body_end])?);
        rest = &rest[body_end + 1..];
    }

    Some(Step { axis, test, predicates })
}

/// Index of the ']' closing the predicate that starts at `rest[0]`.
fn closing_bracket(rest: &str) -> Option<usize> {
    if !rest.starts_with('[') {
        return None;
    }
    let mut quote: Option<char> = None;
    for (idx, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(idx),
            (None, '[') => return None,
            _ => {}
        }
    }
    None
}

fn parse_predicate(body: &str) -> Option<Predicate> {
    let body = body.trim();

    if let Some(attr) = body.strip_prefix('@') {
        return match attr.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))?;
                is_name(key).then(|| Predicate::AttributeEquals(key.to_string(), unquoted.to_string()))
            }
            None => is_name(attr.trim()).then(|| Predicate::HasAttribute(attr.trim().to_string())),
        };
    }

    if let Ok(position) = body.parse::<usize>() {
        return (position > 0).then_some(Predicate::Position(position));
    }

    let names: Vec<String> = body.split('|').map(|n| n.trim().to_string()).collect();
    if names.iter().all(|n| is_name(n)) {
        Some(Predicate::HasChild(names))
    } else {
        None
    }
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use crate::document::VmDocument;

    const VM: &str = r#"<VM>
  <NAME>fw-vm</NAME>
  <TEMPLATE>
    <NIC>
      <BRIDGE>br0</BRIDGE>
      <WHITE_PORTS_TCP>22,80</WHITE_PORTS_TCP>
    </NIC>
    <NIC>
      <BRIDGE>br1</BRIDGE>
    </NIC>
    <NIC>
      <BRIDGE>br2</BRIDGE>
      <ICMP>drop</ICMP>
    </NIC>
  </TEMPLATE>
  <devices>
    <interface type='bridge'><mac address='aa'/><target dev='vnet0'/></interface>
    <interface type='network'><mac address='bb'/><target dev='vnet1'/></interface>
  </devices>
</VM>"#;

    fn bridges(doc: &VmDocument, path: &str) -> Vec<String> {
        doc.elements(path)
            .iter()
            .filter_map(|nic| nic.field("BRIDGE"))
            .collect()
    }

    #[test]
    fn test_child_steps() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        assert_eq!(bridges(&doc, "TEMPLATE/NIC"), vec!["br0", "br1", "br2"]);
        assert_eq!(bridges(&doc, "/VM/TEMPLATE/NIC"), vec!["br0", "br1", "br2"]);
        assert!(doc.elements("/OTHER/TEMPLATE/NIC").is_empty());
    }

    #[test]
    fn test_child_existence_predicate() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        let filter = "TEMPLATE/NIC[ICMP|WHITE_PORTS_TCP|WHITE_PORTS_UDP]";
        assert_eq!(bridges(&doc, filter), vec!["br0", "br2"]);
        assert!(doc.elements("TEMPLATE/NIC[BLACK_PORTS_UDP]").is_empty());
    }

    #[test]
    fn test_descendant_steps() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        assert_eq!(doc.elements("//NIC").len(), 3);
        assert_eq!(doc.elements("//VM").len(), 1);
        assert_eq!(doc.elements("TEMPLATE//ICMP").len(), 1);
        assert_eq!(doc.elements("//*[ICMP|WHITE_PORTS_TCP]").len(), 2);
    }

    #[test]
    fn test_nested_contexts_do_not_duplicate_matches() {
        let doc = VmDocument::parse(
            b"<VM><T><T><T><N>1</N></T><N>2</N></T></T></VM>".as_slice(),
        )
        .unwrap();

        let found: Vec<String> = doc
            .elements("//T//N")
            .iter()
            .filter_map(|n| n.text().map(str::to_string))
            .collect();
        assert_eq!(found, vec!["1", "2"]);
        assert_eq!(doc.elements("T//*").len(), 4);
    }

    #[test]
    fn test_attribute_predicates() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        let bridged = doc.elements("devices/interface[@type='bridge']");
        assert_eq!(bridged.len(), 1);
        assert_eq!(bridged[0].first("target").unwrap().attribute("dev"), Some("vnet0"));
        assert_eq!(doc.elements("devices/interface[@type]").len(), 2);
        assert_eq!(doc.elements("devices/interface/mac[@address=\"bb\"]").len(), 1);
    }

    #[test]
    fn test_position_predicate() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        assert_eq!(bridges(&doc, "TEMPLATE/NIC[2]"), vec!["br1"]);
        assert!(doc.elements("TEMPLATE/NIC[4]").is_empty());
    }

    #[test]
    fn test_malformed_paths_match_nothing() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        for path in ["", "/", "TEMPLATE/", "TEMPLATE/NIC[", "NIC[@type=bridge]", "a///b", "NIC[0]"] {
            assert!(doc.elements(path).is_empty(), "path {:?} should match nothing", path);
        }
    }
}

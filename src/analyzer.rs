use serde::Serialize;

use crate::ast::{Document, OperationType, Selection, SelectionSet};

/// Cheap structural facts about a parsed query, for correlating timings
/// with query shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuralSummary {
    pub operation_count: usize,
    pub operation_type: Option<OperationType>,
    pub operation_name: Option<String>,
    /// Fields selected, counting fragment contents once per spread.
    pub field_count: usize,
    /// Deepest field nesting; fragments do not add a level.
    pub max_depth: usize,
    pub fragment_spread_count: usize,
    pub inline_fragment_count: usize,
    pub has_arguments: bool,
    /// Response keys selected at the operation root, in document order.
    pub top_level_fields: Vec<String>,
}

/// Read-only walk over a parsed document.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralAnalyzer;

impl StructuralAnalyzer {
    /// Summarise `doc`. Never fails on a document the parser accepted:
    /// unknown fragments are skipped and recursive spreads are not
    /// followed twice.
    pub fn analyze(doc: &Document) -> StructuralSummary {
        let mut walker = Walker {
            doc,
            active_fragments: Vec::new(),
            summary: StructuralSummary::default(),
        };

        for (i, op) in doc.operations().enumerate() {
            if i == 0 {
                walker.summary.operation_type = Some(op.operation_type);
                walker.summary.operation_name = op.name.clone();
            }
            walker.summary.operation_count += 1;
            let depth = walker.walk(&op.selection_set, 0);
            walker.summary.max_depth = walker.summary.max_depth.max(depth);
        }

        walker.summary
    }
}

struct Walker<'a> {
    doc: &'a Document,
    active_fragments: Vec<&'a str>,
    summary: StructuralSummary,
}

impl<'a> Walker<'a> {
    /// Returns the depth of the deepest field under `set`.
    fn walk(&mut self, set: &'a SelectionSet, level: usize) -> usize {
        let mut deepest = 0;

        for selection in &set.selections {
            let depth = match selection {
                Selection::Field(field) => {
                    self.summary.field_count += 1;
                    if !field.arguments.is_empty() {
                        self.summary.has_arguments = true;
                    }
                    if level == 0 {
                        self.summary
                            .top_level_fields
                            .push(field.response_key().to_owned());
                    }
                    match &field.selection_set {
                        Some(children) => 1 + self.walk(children, level + 1),
                        None => 1,
                    }
                }
                Selection::InlineFragment(frag) => {
                    self.summary.inline_fragment_count += 1;
                    self.walk(&frag.selection_set, level)
                }
                Selection::FragmentSpread(spread) => {
                    self.summary.fragment_spread_count += 1;
                    let name = spread.fragment_name.as_str();
                    if self.active_fragments.contains(&name) {
                        continue;
                    }
                    match self.doc.fragment(name) {
                        Some(def) => {
                            self.active_fragments.push(&def.name);
                            let depth = self.walk(&def.selection_set, level);
                            self.active_fragments.pop();
                            depth
                        }
                        None => 0,
                    }
                }
            };
            deepest = deepest.max(depth);
        }

        deepest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn query(selections: Vec<Selection>) -> Definition {
        Definition::Operation(OperationDefinition {
            operation_type: OperationType::Query,
            name: Some("Viewer".into()),
            selection_set: SelectionSet { selections },
        })
    }

    fn field(name: &str) -> Selection {
        Selection::Field(Field::new(name))
    }

    fn spread(name: &str) -> Selection {
        Selection::FragmentSpread(FragmentSpread {
            fragment_name: name.into(),
        })
    }

    #[test]
    fn counts_fields_and_depth() {
        let doc = Document {
            definitions: vec![query(vec![
                Selection::Field(
                    Field::new("viewer")
                        .with_argument("id")
                        .with_selections(vec![
                            field("login"),
                            Selection::Field(
                                Field::new("repos").with_selections(vec![field("name")]),
                            ),
                        ]),
                ),
                Selection::Field(Field::new("node").with_alias("first")),
            ])],
        };

        let summary = StructuralAnalyzer::analyze(&doc);

        assert_eq!(summary.operation_count, 1);
        assert_eq!(summary.operation_type, Some(OperationType::Query));
        assert_eq!(summary.operation_name.as_deref(), Some("Viewer"));
        assert_eq!(summary.field_count, 5);
        assert_eq!(summary.max_depth, 3);
        assert!(summary.has_arguments);
        assert_eq!(summary.top_level_fields, vec!["viewer", "first"]);
    }

    #[test]
    fn expands_fragments_without_adding_depth() {
        let doc = Document {
            definitions: vec![
                query(vec![Selection::Field(
                    Field::new("viewer").with_selections(vec![
                        spread("UserParts"),
                        Selection::InlineFragment(InlineFragment {
                            type_condition: Some("User".into()),
                            selection_set: SelectionSet {
                                selections: vec![field("bio")],
                            },
                        }),
                    ]),
                )]),
                Definition::Fragment(FragmentDefinition {
                    name: "UserParts".into(),
                    type_condition: "User".into(),
                    selection_set: SelectionSet {
                        selections: vec![field("id"), field("login")],
                    },
                }),
            ],
        };

        let summary = StructuralAnalyzer::analyze(&doc);

        assert_eq!(summary.field_count, 4);
        assert_eq!(summary.max_depth, 2);
        assert_eq!(summary.fragment_spread_count, 1);
        assert_eq!(summary.inline_fragment_count, 1);
        assert!(!summary.has_arguments);
    }

    #[test]
    fn survives_recursive_and_unknown_fragments() {
        let doc = Document {
            definitions: vec![
                query(vec![spread("Loop"), spread("Missing")]),
                Definition::Fragment(FragmentDefinition {
                    name: "Loop".into(),
                    type_condition: "Query".into(),
                    selection_set: SelectionSet {
                        selections: vec![field("a"), spread("Loop")],
                    },
                }),
            ],
        };

        let summary = StructuralAnalyzer::analyze(&doc);

        assert_eq!(summary.field_count, 1);
        assert_eq!(summary.fragment_spread_count, 3);
        assert_eq!(summary.top_level_fields, vec!["a"]);
    }

    #[test]
    fn empty_document() {
        let summary = StructuralAnalyzer::analyze(&Document::default());
        assert_eq!(summary, StructuralSummary::default());
    }
}

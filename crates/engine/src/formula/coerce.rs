// Table-driven type coercion. Each operator class owns a rule table
// mapping (type1, type2) to a result type. Lookup is two-level: the
// second operand's exact tag first, then its major-class wildcard
// ("n*", "e*", ...); the matched entry either names the result directly
// or holds an inner rule list keyed the same way on the first operand.
// Tables are built once and never re-parsed per lookup.

use std::sync::OnceLock;

use super::value::{ErrorKind, ValueType};

/// How a rule matches an operand's type tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypeMatch {
    /// The full tag, e.g. "nd" or "e#REF!".
    Exact(&'static str),
    /// Any tag in a major class, e.g. Major('n') for "n*".
    Major(char),
    /// Matches everything. Keeps the tables total.
    Any,
}

impl TypeMatch {
    fn matches(&self, vtype: &ValueType) -> bool {
        match self {
            TypeMatch::Exact(tag) => vtype.tag() == *tag,
            TypeMatch::Major(major) => vtype.major() == *major,
            TypeMatch::Any => true,
        }
    }
}

/// What a matched rule yields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultSel {
    /// A literal result type tag.
    Type(&'static str),
    /// Same type as the first operand.
    Operand1,
    /// Same type as the second operand.
    Operand2,
}

impl ResultSel {
    fn apply(&self, t1: &ValueType, t2: &ValueType) -> ValueType {
        match self {
            ResultSel::Type(tag) => {
                ValueType::from_tag(tag).unwrap_or(ValueType::Error(ErrorKind::Value))
            }
            ResultSel::Operand1 => *t1,
            ResultSel::Operand2 => *t2,
        }
    }
}

/// Inner rule, matched against the first operand's type.
#[derive(Debug, Clone, Copy)]
pub struct CoerceRule {
    pub when: TypeMatch,
    pub sel: ResultSel,
}

/// Outer entry, matched against the second operand's type.
#[derive(Debug, Clone)]
enum Entry {
    Direct(ResultSel),
    ByFirst(Vec<CoerceRule>),
}

#[derive(Debug, Clone)]
pub struct CoerceTable {
    rows: Vec<(TypeMatch, Entry)>,
}

impl CoerceTable {
    fn new(rows: Vec<(TypeMatch, Entry)>) -> CoerceTable {
        CoerceTable { rows }
    }

    /// Resolve the result type for (type1, type2). Total: pairs no rule
    /// covers come back as Err with the #VALUE! fallback inside.
    pub fn lookup(&self, t1: &ValueType, t2: &ValueType) -> Option<ValueType> {
        let entry = self
            .rows
            .iter()
            .find(|(m, _)| matches!(m, TypeMatch::Exact(_)) && m.matches(t2))
            .or_else(|| {
                self.rows
                    .iter()
                    .find(|(m, _)| !matches!(m, TypeMatch::Exact(_)) && m.matches(t2))
            })
            .map(|(_, e)| e)?;
        match entry {
            Entry::Direct(sel) => Some(sel.apply(t1, t2)),
            Entry::ByFirst(rules) => {
                let rule = rules
                    .iter()
                    .find(|r| matches!(r.when, TypeMatch::Exact(_)) && r.when.matches(t1))
                    .or_else(|| {
                        rules
                            .iter()
                            .find(|r| !matches!(r.when, TypeMatch::Exact(_)) && r.when.matches(t1))
                    })?;
                Some(rule.sel.apply(t1, t2))
            }
        }
    }

    /// Like `lookup`, with the #VALUE! fallback applied.
    pub fn resolve(&self, t1: &ValueType, t2: &ValueType) -> ValueType {
        self.lookup(t1, t2)
            .unwrap_or(ValueType::Error(ErrorKind::Value))
    }
}

/// The full set of operator rule tables.
pub struct CoerceTables {
    /// Shared by binary `+`, `-` and `*`: subtypes combine by domain
    /// rules (date plus number stays a date, date plus date collapses
    /// to a plain number, percent is otherwise numeric).
    pub plus: CoerceTable,
    /// `/` and `^`: any numeric pairing yields a plain number.
    pub twoargnumeric: CoerceTable,
    /// Unary `-` and `+`: the operand's subtype is preserved.
    pub oneargnumeric: CoerceTable,
    /// Postfix `%`.
    pub unarypercent: CoerceTable,
    /// `&` concatenation.
    pub concat: CoerceTable,
    /// Pure error propagation; used by the comparison operators.
    pub propagateerror: CoerceTable,
}

fn rule(when: TypeMatch, sel: ResultSel) -> CoerceRule {
    CoerceRule { when, sel }
}

/// Standard inner prefix: an error first operand wins, a text first
/// operand poisons the pairing.
fn err_text_prefix() -> Vec<CoerceRule> {
    vec![
        rule(TypeMatch::Major('e'), ResultSel::Operand1),
        rule(TypeMatch::Major('t'), ResultSel::Type("e#VALUE!")),
    ]
}

fn numeric_row(pairings: &[(&'static str, &'static str)]) -> Entry {
    let mut rules = err_text_prefix();
    for (tag, result) in pairings {
        rules.push(rule(TypeMatch::Exact(tag), ResultSel::Type(result)));
    }
    rules.push(rule(TypeMatch::Major('n'), ResultSel::Type("n")));
    rules.push(rule(TypeMatch::Any, ResultSel::Type("e#VALUE!")));
    Entry::ByFirst(rules)
}

fn build_plus() -> CoerceTable {
    CoerceTable::new(vec![
        // type2 error: propagate it.
        (TypeMatch::Major('e'), Entry::Direct(ResultSel::Operand2)),
        // type2 text: an error on the left still wins, otherwise #VALUE!.
        (
            TypeMatch::Major('t'),
            Entry::ByFirst({
                let mut rules = err_text_prefix();
                rules.push(rule(TypeMatch::Any, ResultSel::Type("e#VALUE!")));
                rules
            }),
        ),
        (
            TypeMatch::Exact("n"),
            numeric_row(&[
                ("n", "n"),
                ("b", "n"),
                ("n%", "n"),
                ("nd", "nd"),
                ("nt", "nt"),
                ("ndt", "ndt"),
                ("n$", "n$"),
            ]),
        ),
        (
            TypeMatch::Exact("nd"),
            numeric_row(&[
                ("n", "nd"),
                ("b", "nd"),
                ("n%", "nd"),
                ("nd", "n"),
                ("nt", "ndt"),
                ("ndt", "n"),
            ]),
        ),
        (
            TypeMatch::Exact("nt"),
            numeric_row(&[
                ("n", "nt"),
                ("b", "nt"),
                ("n%", "nt"),
                ("nt", "nt"),
                ("nd", "ndt"),
                ("ndt", "ndt"),
            ]),
        ),
        (
            TypeMatch::Exact("ndt"),
            numeric_row(&[
                ("n", "ndt"),
                ("b", "ndt"),
                ("n%", "ndt"),
                ("nd", "n"),
                ("nt", "ndt"),
                ("ndt", "n"),
            ]),
        ),
        (
            TypeMatch::Exact("n$"),
            numeric_row(&[("n", "n$"), ("b", "n$"), ("n%", "n$"), ("n$", "n$")]),
        ),
        (
            TypeMatch::Exact("n%"),
            numeric_row(&[("n", "n"), ("b", "n%"), ("n%", "n%")]),
        ),
        (
            TypeMatch::Exact("b"),
            numeric_row(&[
                ("n", "n"),
                ("b", "n"),
                ("n%", "n%"),
                ("nd", "nd"),
                ("nt", "nt"),
                ("ndt", "ndt"),
                ("n$", "n$"),
            ]),
        ),
        // Remaining numeric subtypes (nl) behave as plain numbers.
        (TypeMatch::Major('n'), numeric_row(&[])),
    ])
}

fn build_twoargnumeric() -> CoerceTable {
    let plain = |_: ()| -> Entry {
        let mut rules = err_text_prefix();
        rules.push(rule(TypeMatch::Major('n'), ResultSel::Type("n")));
        rules.push(rule(TypeMatch::Major('b'), ResultSel::Type("n")));
        rules.push(rule(TypeMatch::Any, ResultSel::Type("e#VALUE!")));
        Entry::ByFirst(rules)
    };
    CoerceTable::new(vec![
        (TypeMatch::Major('e'), Entry::Direct(ResultSel::Operand2)),
        (
            TypeMatch::Major('t'),
            Entry::ByFirst({
                let mut rules = err_text_prefix();
                rules.push(rule(TypeMatch::Any, ResultSel::Type("e#VALUE!")));
                rules
            }),
        ),
        (TypeMatch::Major('n'), plain(())),
        (TypeMatch::Major('b'), plain(())),
    ])
}

fn build_oneargnumeric() -> CoerceTable {
    CoerceTable::new(vec![
        (TypeMatch::Major('e'), Entry::Direct(ResultSel::Operand1)),
        (TypeMatch::Major('t'), Entry::Direct(ResultSel::Type("e#VALUE!"))),
        (TypeMatch::Major('n'), Entry::Direct(ResultSel::Operand1)),
        (TypeMatch::Major('b'), Entry::Direct(ResultSel::Type("n"))),
    ])
}

fn build_unarypercent() -> CoerceTable {
    CoerceTable::new(vec![
        (TypeMatch::Major('e'), Entry::Direct(ResultSel::Operand1)),
        (TypeMatch::Major('t'), Entry::Direct(ResultSel::Type("e#VALUE!"))),
        (TypeMatch::Exact("n"), Entry::Direct(ResultSel::Type("n%"))),
        (TypeMatch::Exact("n%"), Entry::Direct(ResultSel::Type("n%"))),
        (TypeMatch::Major('n'), Entry::Direct(ResultSel::Type("n"))),
        (TypeMatch::Major('b'), Entry::Direct(ResultSel::Type("n"))),
    ])
}

fn build_concat() -> CoerceTable {
    let text_row = |tag: &'static str| -> (TypeMatch, Entry) {
        (
            TypeMatch::Exact(tag),
            Entry::ByFirst(vec![
                rule(TypeMatch::Major('e'), ResultSel::Operand1),
                // Matching subtypes keep the subtype, anything else is plain.
                rule(TypeMatch::Exact(tag), ResultSel::Type(tag)),
                rule(TypeMatch::Any, ResultSel::Type("t")),
            ]),
        )
    };
    CoerceTable::new(vec![
        (TypeMatch::Major('e'), Entry::Direct(ResultSel::Operand2)),
        text_row("t"),
        text_row("th"),
        text_row("tw"),
        text_row("tl"),
        (
            TypeMatch::Major('n'),
            Entry::ByFirst(vec![
                rule(TypeMatch::Major('e'), ResultSel::Operand1),
                rule(TypeMatch::Any, ResultSel::Type("t")),
            ]),
        ),
        (
            TypeMatch::Major('b'),
            Entry::ByFirst(vec![
                rule(TypeMatch::Major('e'), ResultSel::Operand1),
                rule(TypeMatch::Any, ResultSel::Type("t")),
            ]),
        ),
    ])
}

fn build_propagateerror() -> CoerceTable {
    CoerceTable::new(vec![
        (TypeMatch::Major('e'), Entry::Direct(ResultSel::Operand2)),
        (
            TypeMatch::Any,
            Entry::ByFirst(vec![
                rule(TypeMatch::Major('e'), ResultSel::Operand1),
                rule(TypeMatch::Any, ResultSel::Operand2),
            ]),
        ),
    ])
}

/// The shared, immutable rule tables. Built on first use.
pub fn tables() -> &'static CoerceTables {
    static TABLES: OnceLock<CoerceTables> = OnceLock::new();
    TABLES.get_or_init(|| CoerceTables {
        plus: build_plus(),
        twoargnumeric: build_twoargnumeric(),
        oneargnumeric: build_oneargnumeric(),
        unarypercent: build_unarypercent(),
        concat: build_concat(),
        propagateerror: build_propagateerror(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::value::{ErrorKind, NumberKind, TextKind};

    fn t(tag: &str) -> ValueType {
        ValueType::from_tag(tag).unwrap()
    }

    fn all_types() -> Vec<ValueType> {
        let mut all = vec![ValueType::Blank];
        for kind in [
            NumberKind::Plain,
            NumberKind::Date,
            NumberKind::Time,
            NumberKind::DateTime,
            NumberKind::Currency,
            NumberKind::Percent,
            NumberKind::Logical,
        ] {
            all.push(ValueType::Number(kind));
        }
        for kind in [TextKind::Plain, TextKind::Html, TextKind::Wiki, TextKind::Link] {
            all.push(ValueType::Text(kind));
        }
        for kind in [
            ErrorKind::Null,
            ErrorKind::Num,
            ErrorKind::Div0,
            ErrorKind::Value,
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::NA,
        ] {
            all.push(ValueType::Error(kind));
        }
        all
    }

    #[test]
    fn test_every_table_is_total_over_every_type_pair() {
        let tables = tables();
        for table in [
            &tables.plus,
            &tables.twoargnumeric,
            &tables.oneargnumeric,
            &tables.unarypercent,
            &tables.concat,
            &tables.propagateerror,
        ] {
            for t1 in all_types() {
                for t2 in all_types() {
                    assert!(
                        table.lookup(&t1, &t2).is_some(),
                        "no rule for ({}, {})",
                        t1.tag(),
                        t2.tag()
                    );
                }
            }
        }
    }

    // ── domain rules ──────────────────────────────────────────────

    #[test]
    fn test_date_plus_number_is_date() {
        let plus = &tables().plus;
        assert_eq!(plus.resolve(&t("nd"), &t("n")).tag(), "nd");
        assert_eq!(plus.resolve(&t("n"), &t("nd")).tag(), "nd");
    }

    #[test]
    fn test_date_plus_date_is_plain_number() {
        assert_eq!(tables().plus.resolve(&t("nd"), &t("nd")).tag(), "n");
    }

    #[test]
    fn test_date_plus_time_is_datetime() {
        let plus = &tables().plus;
        assert_eq!(plus.resolve(&t("nd"), &t("nt")).tag(), "ndt");
        assert_eq!(plus.resolve(&t("nt"), &t("nd")).tag(), "ndt");
    }

    #[test]
    fn test_percent_is_otherwise_numeric() {
        let plus = &tables().plus;
        assert_eq!(plus.resolve(&t("n%"), &t("n%")).tag(), "n%");
        assert_eq!(plus.resolve(&t("n%"), &t("n")).tag(), "n");
    }

    #[test]
    fn test_blank_coerces_to_plain_number() {
        let plus = &tables().plus;
        assert_eq!(plus.resolve(&t("b"), &t("b")).tag(), "n");
        assert_eq!(plus.resolve(&t("b"), &t("n$")).tag(), "n$");
    }

    // ── wildcard dominance ────────────────────────────────────────

    #[test]
    fn test_error_dominates_either_side() {
        let plus = &tables().plus;
        assert_eq!(plus.resolve(&t("e#REF!"), &t("n")).tag(), "e#REF!");
        assert_eq!(plus.resolve(&t("n"), &t("e#NUM!")).tag(), "e#NUM!");
        // Right-hand error wins when both sides are errors.
        assert_eq!(plus.resolve(&t("e#REF!"), &t("e#NUM!")).tag(), "e#NUM!");
    }

    #[test]
    fn test_text_dominates_arithmetic_as_value_error() {
        let plus = &tables().plus;
        assert_eq!(plus.resolve(&t("t"), &t("n")).tag(), "e#VALUE!");
        assert_eq!(plus.resolve(&t("n"), &t("th")).tag(), "e#VALUE!");
    }

    #[test]
    fn test_exact_match_beats_wildcard() {
        // "nd" has an exact row; the n* wildcard row must not shadow it.
        assert_eq!(tables().plus.resolve(&t("nt"), &t("nd")).tag(), "ndt");
    }

    #[test]
    fn test_division_collapses_subtypes() {
        let two = &tables().twoargnumeric;
        assert_eq!(two.resolve(&t("n$"), &t("n")).tag(), "n");
        assert_eq!(two.resolve(&t("nd"), &t("nd")).tag(), "n");
        assert_eq!(two.resolve(&t("e#DIV/0!"), &t("n")).tag(), "e#DIV/0!");
    }

    #[test]
    fn test_unary_preserves_subtype() {
        let one = &tables().oneargnumeric;
        assert_eq!(one.resolve(&t("n$"), &t("n$")).tag(), "n$");
        assert_eq!(one.resolve(&t("b"), &t("b")).tag(), "n");
        assert_eq!(one.resolve(&t("t"), &t("t")).tag(), "e#VALUE!");
    }

    #[test]
    fn test_unary_percent() {
        let pct = &tables().unarypercent;
        assert_eq!(pct.resolve(&t("n"), &t("n")).tag(), "n%");
        assert_eq!(pct.resolve(&t("nd"), &t("nd")).tag(), "n");
    }

    #[test]
    fn test_concat_keeps_matching_text_subtype() {
        let concat = &tables().concat;
        assert_eq!(concat.resolve(&t("th"), &t("th")).tag(), "th");
        assert_eq!(concat.resolve(&t("th"), &t("t")).tag(), "t");
        assert_eq!(concat.resolve(&t("n"), &t("t")).tag(), "t");
        assert_eq!(concat.resolve(&t("e#N/A"), &t("t")).tag(), "e#N/A");
    }

    #[test]
    fn test_propagateerror_passes_values_through() {
        let prop = &tables().propagateerror;
        assert_eq!(prop.resolve(&t("n"), &t("t")).tag(), "t");
        assert_eq!(prop.resolve(&t("e#N/A"), &t("n")).tag(), "e#N/A");
        assert_eq!(prop.resolve(&t("n"), &t("e#REF!")).tag(), "e#REF!");
    }
}

//! PostgreSQL rendering of [`Predicate`]s.
//!
//! Every literal is bound as a parameter; only field expressions and
//! operators are written into the SQL text. Fields are addressed through
//! the `r` alias of the `run` table.

use sqlx::{Postgres, QueryBuilder};

use super::{CompareOp, Field, Predicate, Scalar};

impl Predicate {
    /// Append this predicate to `qb` as a parenthesised boolean expression.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Predicate::True => {
                qb.push("true");
            }
            Predicate::False => {
                qb.push("false");
            }
            Predicate::And(parts) => push_joined(qb, parts, " AND ", "true"),
            Predicate::Or(parts) => push_joined(qb, parts, " OR ", "false"),
            Predicate::Compare { field, op, value } => {
                qb.push("(");
                push_field(qb, field);
                qb.push(" ");
                qb.push(op.as_sql());
                qb.push(" ");
                push_scalar(qb, value);
                qb.push(")");
            }
            Predicate::In { field, values } => {
                if values.is_empty() {
                    qb.push("false");
                    return;
                }
                qb.push("(");
                push_field(qb, field);
                qb.push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    push_scalar(qb, value);
                }
                qb.push("))");
            }
            Predicate::Overlaps { field, values } => {
                qb.push("(");
                push_field(qb, field);
                qb.push(" && ");
                qb.push_bind(values.clone());
                qb.push(")");
            }
            Predicate::Contains { fields, needle } => {
                if fields.is_empty() {
                    qb.push("false");
                    return;
                }
                let pattern = format!("%{}%", escape_like(needle));
                qb.push("(");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    match field {
                        Field::Input => push_json_strings_ilike(qb, "r.input", &pattern),
                        Field::Output => push_json_strings_ilike(qb, "r.output", &pattern),
                        other => {
                            push_field(qb, other);
                            qb.push(" ILIKE ");
                            qb.push_bind(pattern.clone());
                        }
                    }
                }
                qb.push(")");
            }
        }
    }
}

fn push_joined(qb: &mut QueryBuilder<'_, Postgres>, parts: &[Predicate], sep: &str, empty: &str) {
    if parts.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(sep);
        }
        part.push_sql(qb);
    }
    qb.push(")");
}

fn push_field(qb: &mut QueryBuilder<'_, Postgres>, field: &Field) {
    match field {
        Field::Type => {
            qb.push("r.type");
        }
        Field::Name => {
            qb.push("r.name");
        }
        Field::Status => {
            qb.push("r.status");
        }
        Field::ExternalUserId => {
            qb.push("r.external_user_id");
        }
        Field::DurationMs => {
            qb.push("(extract(epoch from (r.ended_at - r.created_at)) * 1000)");
        }
        Field::Cost => {
            qb.push("r.cost");
        }
        Field::TotalTokens => {
            qb.push("(coalesce(r.prompt_tokens, 0) + coalesce(r.completion_tokens, 0))");
        }
        Field::Tags => {
            qb.push("r.tags");
        }
        Field::Metadata(key) => {
            qb.push("(r.metadata ->> ");
            qb.push_bind(key.clone());
            qb.push(")");
        }
        Field::Input => {
            qb.push("r.input::text");
        }
        Field::Output => {
            qb.push("r.output::text");
        }
    }
}

/// Any string value at any depth of the jsonb `column` matches `pattern`.
fn push_json_strings_ilike(qb: &mut QueryBuilder<'_, Postgres>, column: &str, pattern: &str) {
    qb.push("EXISTS (SELECT 1 FROM jsonb_path_query(");
    qb.push(column);
    qb.push(", 'strict $.**') AS j(item) WHERE jsonb_typeof(j.item) = 'string' AND (j.item #>> '{}') ILIKE ");
    qb.push_bind(pattern.to_string());
    qb.push(")");
}

fn push_scalar(qb: &mut QueryBuilder<'_, Postgres>, value: &Scalar) {
    match value {
        Scalar::Text(s) => {
            qb.push_bind(s.clone());
        }
        Scalar::Number(n) => {
            qb.push_bind(*n);
        }
        Scalar::Integer(i) => {
            qb.push_bind(*i);
        }
    }
}

/// Escape `LIKE` metacharacters so user text matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(p: &Predicate) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("");
        p.push_sql(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn literals_are_bound_not_inlined() {
        let p = Predicate::Compare {
            field: Field::Status,
            op: CompareOp::Eq,
            value: Scalar::Text("error'; drop table run; --".into()),
        };
        assert_eq!(render(&p), "(r.status = $1)");
    }

    #[test]
    fn combinators_and_identities() {
        let p = Predicate::Or(vec![
            Predicate::Compare {
                field: Field::Status,
                op: CompareOp::Eq,
                value: Scalar::Text("error".into()),
            },
            Predicate::Compare {
                field: Field::DurationMs,
                op: CompareOp::Gt,
                value: Scalar::Number(30000.0),
            },
        ]);
        assert_eq!(
            render(&p),
            "((r.status = $1) OR ((extract(epoch from (r.ended_at - r.created_at)) * 1000) > $2))"
        );
        assert_eq!(render(&Predicate::And(vec![])), "true");
        assert_eq!(render(&Predicate::Or(vec![])), "false");
    }

    #[test]
    fn in_list_and_metadata() {
        let p = Predicate::And(vec![
            Predicate::In {
                field: Field::Name,
                values: vec![Scalar::Text("a".into()), Scalar::Text("b".into())],
            },
            Predicate::Compare {
                field: Field::Metadata("env".into()),
                op: CompareOp::Eq,
                value: Scalar::Text("prod".into()),
            },
        ]);
        assert_eq!(
            render(&p),
            "((r.name IN ($1, $2)) AND ((r.metadata ->> $3) = $4))"
        );
        assert_eq!(render(&Predicate::In { field: Field::Name, values: vec![] }), "false");
    }

    #[test]
    fn contains_searches_json_string_values() {
        let p = Predicate::Contains {
            fields: vec![Field::Input, Field::Output],
            needle: "50%".into(),
        };
        assert_eq!(
            render(&p),
            "(EXISTS (SELECT 1 FROM jsonb_path_query(r.input, 'strict $.**') AS j(item) \
             WHERE jsonb_typeof(j.item) = 'string' AND (j.item #>> '{}') ILIKE $1) \
             OR EXISTS (SELECT 1 FROM jsonb_path_query(r.output, 'strict $.**') AS j(item) \
             WHERE jsonb_typeof(j.item) = 'string' AND (j.item #>> '{}') ILIKE $2))"
        );

        let status = Predicate::Contains { fields: vec![Field::Status], needle: "err".into() };
        assert_eq!(render(&status), "(r.status ILIKE $1)");
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }

    #[test]
    fn every_operator_has_sql() {
        let ops: Vec<&str> = CompareOp::NAMES
            .iter()
            .map(|name| CompareOp::parse(name).unwrap().as_sql())
            .collect();
        assert_eq!(ops, vec!["=", "<>", ">", ">=", "<", "<="]);
    }
}

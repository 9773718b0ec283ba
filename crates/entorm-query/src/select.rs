//! SELECT and COUNT statement assembly.

use entorm_core::{Catalog, Dialect, EntityDef, Error, Result};

use crate::filter::Filter;

/// One ordering term. Fields are named as declared, case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    #[must_use]
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    #[must_use]
    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u64,
    pub size: u64,
}

/// Number of pages needed to hold `total` rows, rounding up.
#[must_use]
pub fn pages_count(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        0
    } else {
        total.div_ceil(page_size)
    }
}

/// Assemble the full-projection SELECT for `def`.
///
/// Filters are joined with `and`. `sort: None` means the caller does not
/// care and gets the deterministic default (reference ascending);
/// `Some(&[])` explicitly asks for storage order, which makes pagination
/// illegal since page boundaries would be unstable.
pub fn build_select(
    catalog: &Catalog,
    def: &EntityDef,
    dialect: Dialect,
    filters: &[Filter],
    sort: Option<&[Sort]>,
    page: Option<Page>,
) -> Result<String> {
    let columns: Vec<String> = def.fields().iter().map(|f| f.sql_name()).collect();
    let mut sql = format!(
        "select {} from {}",
        columns.join(", "),
        def.sql_table_name()
    );
    append_where(&mut sql, catalog, def, dialect, filters)?;

    let order_terms = match sort {
        None => vec![Sort::asc("Ref")],
        Some(terms) => terms.to_vec(),
    };
    if order_terms.is_empty() {
        if page.is_some() {
            return Err(Error::InvalidQuery(format!(
                "pagination over {} requires an ordering",
                def.name()
            )));
        }
    } else {
        let mut rendered = Vec::with_capacity(order_terms.len());
        for term in &order_terms {
            let fd = def.field_by_name(&term.field).ok_or_else(|| {
                Error::InvalidQuery(format!("no field {} on {}", term.field, def.name()))
            })?;
            let direction = if term.descending { " desc" } else { "" };
            rendered.push(format!("{}{}", fd.sql_name(), direction));
        }
        sql.push_str(" order by ");
        sql.push_str(&rendered.join(", "));
    }

    if let Some(page) = page {
        if page.number == 0 || page.size == 0 {
            return Err(Error::InvalidQuery(format!(
                "page number and size must be positive for {}",
                def.name()
            )));
        }
        sql.push_str(&dialect.pagination_clause(page.number, page.size));
    }
    Ok(sql)
}

/// Assemble the COUNT form of the same query, for page-count math.
pub fn build_count(
    catalog: &Catalog,
    def: &EntityDef,
    dialect: Dialect,
    filters: &[Filter],
) -> Result<String> {
    let mut sql = format!("select count(*) as total from {}", def.sql_table_name());
    append_where(&mut sql, catalog, def, dialect, filters)?;
    Ok(sql)
}

fn append_where(
    sql: &mut String,
    catalog: &Catalog,
    def: &EntityDef,
    dialect: Dialect,
    filters: &[Filter],
) -> Result<()> {
    if filters.is_empty() {
        return Ok(());
    }
    let parts = filters
        .iter()
        .map(|f| f.render(catalog, def, dialect))
        .collect::<Result<Vec<_>>>()?;
    sql.push_str(" where ");
    sql.push_str(&parts.join(" and "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_def() -> Catalog {
        let mut catalog = Catalog::new();
        let id = catalog.define("SalesOrder").unwrap();
        let def = catalog.def_mut(id);
        def.add_text_field("Number", 20).unwrap();
        def.add_numeric_field("Total", 15, 2).unwrap();
        catalog
    }

    fn def(catalog: &Catalog) -> &EntityDef {
        catalog.def_by_name("SalesOrder").unwrap()
    }

    #[test]
    fn test_default_sort_is_ref_ascending() {
        let catalog = order_def();
        let sql = build_select(&catalog, def(&catalog), Dialect::Sqlite, &[], None, None).unwrap();
        assert_eq!(
            sql,
            "select ref, isdeleted, dataversion, number, total from salesorder order by ref"
        );
    }

    #[test]
    fn test_filters_join_with_and() {
        let catalog = order_def();
        let sql = build_select(
            &catalog,
            def(&catalog),
            Dialect::Sqlite,
            &[Filter::eq("Number", "A-1"), Filter::gt("Total", 2.0)],
            Some(&[Sort::desc("Total")]),
            None,
        )
        .unwrap();
        assert!(sql.contains("where number = 'A-1' and total > 2.00"));
        assert!(sql.ends_with("order by total desc"));
    }

    #[test]
    fn test_pagination_per_dialect() {
        let catalog = order_def();
        let page = Some(Page { number: 2, size: 10 });
        let sql = build_select(&catalog, def(&catalog), Dialect::Mysql, &[], None, page).unwrap();
        assert!(sql.ends_with("order by ref limit 10, 10"));
        let sql = build_select(&catalog, def(&catalog), Dialect::Mssql, &[], None, page).unwrap();
        assert!(sql.ends_with("order by ref offset 10 rows fetch next 10 rows only"));
    }

    #[test]
    fn test_unordered_pagination_rejected() {
        let catalog = order_def();
        let err = build_select(
            &catalog,
            def(&catalog),
            Dialect::Sqlite,
            &[],
            Some(&[]),
            Some(Page { number: 1, size: 10 }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn test_explicit_storage_order_without_pagination_allowed() {
        let catalog = order_def();
        let sql = build_select(&catalog, def(&catalog), Dialect::Sqlite, &[], Some(&[]), None).unwrap();
        assert!(!sql.contains("order by"));
    }

    #[test]
    fn test_count_form() {
        let catalog = order_def();
        let sql = build_count(&catalog, def(&catalog), Dialect::Sqlite, &[Filter::eq("Number", "A-1")])
            .unwrap();
        assert_eq!(
            sql,
            "select count(*) as total from salesorder where number = 'A-1'"
        );
    }

    #[test]
    fn test_pages_count_rounds_up() {
        assert_eq!(pages_count(50, 10), 5);
        assert_eq!(pages_count(51, 10), 6);
        assert_eq!(pages_count(0, 10), 0);
    }
}

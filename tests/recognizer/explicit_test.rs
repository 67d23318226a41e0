#[cfg(test)]
mod tests {
    use aggmatch::catalog::{
        CatalogTable, ColumnUsage, DbCatalog, MemoryIntrospector, SqlType, UsageKind,
    };
    use aggmatch::recognizer::{usage_count, ExplicitStrategy, Recognizer};
    use aggmatch::recorder::MsgRecorder;
    use aggmatch::rules::{LevelMapping, MeasureMapping, NameTableDef, TableDef, TableMappings};
    use aggmatch::star::{
        Aggregator, ColumnExpr, DimTarget, JoinCondition, Star, StarColumn, StarDimension,
        StarHierarchy, StarLevel, StarMeasure, StarTable,
    };
    use std::collections::HashMap;

    // Bits: 0 = unit_sales (SUM), 1 = customer_count (DISTINCT over the
    // customer key, bit 4), 2 = category, 3 = brand, 4 = customer key.
    fn sales_star(brand_unique: bool) -> Star {
        let product = StarTable {
            alias: "product".to_string(),
            relation: "product".to_string(),
            join: Some(JoinCondition {
                left: ColumnExpr::new("sales_fact", "product_id"),
                right: ColumnExpr::new("product", "product_id"),
            }),
            columns: vec![
                star_col("category", "product", 2),
                star_col("brand", "product", 3),
            ],
            children: vec![],
        };
        let customer = StarTable {
            alias: "customer".to_string(),
            relation: "customer".to_string(),
            join: Some(JoinCondition {
                left: ColumnExpr::new("sales_fact", "customer_id"),
                right: ColumnExpr::new("customer", "customer_id"),
            }),
            columns: vec![star_col("customer_id", "customer", 4)],
            children: vec![],
        };
        Star {
            name: "sales".to_string(),
            fact: StarTable {
                alias: "sales_fact".to_string(),
                relation: "sales_fact".to_string(),
                join: None,
                columns: vec![],
                children: vec![product, customer],
            },
            measures: vec![
                StarMeasure {
                    name: "unit_sales".to_string(),
                    aggregator: Aggregator::Sum,
                    bit_position: 0,
                    column_name: "amount".to_string(),
                    counted_bit: None,
                },
                StarMeasure {
                    name: "customer_count".to_string(),
                    aggregator: Aggregator::DistinctCount,
                    bit_position: 1,
                    column_name: "customer_id".to_string(),
                    counted_bit: Some(4),
                },
            ],
            dimensions: vec![
                StarDimension {
                    name: "product".to_string(),
                    foreign_key: "product_id".to_string(),
                    target: DimTarget::Table {
                        alias: "product".to_string(),
                    },
                    hierarchies: vec![StarHierarchy {
                        name: "product".to_string(),
                        levels: vec![
                            StarLevel {
                                name: "Category".to_string(),
                                depth: 1,
                                column_bit: 2,
                                column_name: "category".to_string(),
                                unique_members: true,
                                usage_prefix: None,
                            },
                            StarLevel {
                                name: "Brand".to_string(),
                                depth: 2,
                                column_bit: 3,
                                column_name: "brand".to_string(),
                                unique_members: brand_unique,
                                usage_prefix: None,
                            },
                        ],
                    }],
                },
                StarDimension {
                    name: "customer".to_string(),
                    foreign_key: "customer_id".to_string(),
                    target: DimTarget::Table {
                        alias: "customer".to_string(),
                    },
                    hierarchies: vec![],
                },
            ],
            column_count: 5,
        }
    }

    fn star_col(name: &str, table: &str, bit: usize) -> StarColumn {
        StarColumn {
            name: name.to_string(),
            table_alias: table.to_string(),
            expr: ColumnExpr::new(table, name),
            bit_position: bit,
            is_name_column: false,
        }
    }

    fn candidate(name: &str, columns: &[(&str, SqlType)]) -> CatalogTable {
        let mut intro = MemoryIntrospector::new();
        intro.add_table(name, columns, 10);
        let mut catalog = DbCatalog::new();
        catalog.load(&intro).unwrap();
        let table = catalog.table_mut(name).unwrap();
        table.load(&intro).unwrap();
        table.clone()
    }

    fn def_with(mappings: TableMappings) -> TableDef {
        TableDef::Name(NameTableDef {
            name: "agg_custom".to_string(),
            ignore_case: true,
            approx_rows: None,
            mappings,
        })
    }

    fn check(star: &Star, def: &TableDef, table: &mut CatalogTable) -> (bool, MsgRecorder) {
        let strategy = ExplicitStrategy::new(def);
        let mut recognizer = Recognizer::new(star, &strategy);
        let mut recorder = MsgRecorder::new(10);
        let accepted = recognizer.check(table, &mut recorder).unwrap();
        (accepted, recorder)
    }

    #[test]
    fn test_mapped_measure_and_level() {
        let star = sales_star(true);
        let def = def_with(TableMappings {
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            levels: vec![LevelMapping {
                level_name: "Category".to_string(),
                column: "cat".to_string(),
                collapsed: None,
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("cat", SqlType::Varchar),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, _) = check(&star, &def, &mut table);
        assert!(accepted);
        assert_eq!(usage_count(&table, UsageKind::Measure), 1);

        let col = table.column("cat").unwrap();
        assert!(col.usages().iter().any(|u| matches!(
            u,
            ColumnUsage::Level {
                star_bit: 2,
                collapsed: true,
                ..
            }
        )));
    }

    #[test]
    fn test_ignore_columns_are_skipped() {
        let star = sales_star(true);
        let def = def_with(TableMappings {
            ignore_columns: vec!["loaded_at".to_string()],
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("loaded_at", SqlType::Timestamp),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, recorder) = check(&star, &def, &mut table);
        assert!(accepted);
        assert!(table
            .column("loaded_at")
            .unwrap()
            .has_usage(UsageKind::Ignore));
        // Ignored columns never show up as unused.
        assert!(!recorder.warnings().iter().any(|w| w.contains("loaded_at")));
    }

    #[test]
    fn test_explicit_non_collapsed_on_first_deep_level() {
        let star = sales_star(true);
        let def = def_with(TableMappings {
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            levels: vec![LevelMapping {
                level_name: "Brand".to_string(),
                column: "brand_key".to_string(),
                collapsed: Some(false),
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("brand_key", SqlType::Varchar),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, _) = check(&star, &def, &mut table);
        assert!(accepted);
        let col = table.column("brand_key").unwrap();
        assert!(col
            .usages()
            .iter()
            .any(|u| matches!(u, ColumnUsage::Level { collapsed: false, .. })));
    }

    #[test]
    fn test_non_collapsed_rejected_at_depth_one() {
        let star = sales_star(true);
        let def = def_with(TableMappings {
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            levels: vec![LevelMapping {
                level_name: "Category".to_string(),
                column: "cat".to_string(),
                collapsed: Some(false),
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("cat", SqlType::Varchar),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, recorder) = check(&star, &def, &mut table);
        assert!(!accepted);
        assert!(recorder.errors().iter().any(|e| e.contains("depth 1")));
    }

    #[test]
    fn test_non_collapsed_rejected_on_second_level() {
        let star = sales_star(true);
        let def = def_with(TableMappings {
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            levels: vec![
                LevelMapping {
                    level_name: "Category".to_string(),
                    column: "cat".to_string(),
                    collapsed: None,
                },
                LevelMapping {
                    level_name: "Brand".to_string(),
                    column: "brand_key".to_string(),
                    collapsed: Some(false),
                },
            ],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("cat", SqlType::Varchar),
                ("brand_key", SqlType::Varchar),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, recorder) = check(&star, &def, &mut table);
        assert!(!accepted);
        assert!(recorder
            .errors()
            .iter()
            .any(|e| e.contains("first matched level")));
    }

    #[test]
    fn test_non_collapsed_requires_unique_members() {
        let star = sales_star(false);
        let def = def_with(TableMappings {
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            levels: vec![LevelMapping {
                level_name: "Brand".to_string(),
                column: "brand_key".to_string(),
                collapsed: Some(false),
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("brand_key", SqlType::Varchar),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, recorder) = check(&star, &def, &mut table);
        assert!(!accepted);
        assert!(recorder.errors().iter().any(|e| e.contains("not unique")));
    }

    #[test]
    fn test_mapped_foreign_key() {
        let star = sales_star(true);
        let mut foreign_keys = HashMap::new();
        foreign_keys.insert("product_id".to_string(), "prod_key".to_string());
        let def = def_with(TableMappings {
            foreign_keys,
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("prod_key", SqlType::Integer),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, _) = check(&star, &def, &mut table);
        assert!(accepted);
        let col = table.column("prod_key").unwrap();
        assert!(col.usages().iter().any(|u| matches!(
            u,
            ColumnUsage::ForeignKey { fact_column, .. } if fact_column == "product_id"
        )));
    }

    #[test]
    fn test_fk_rider_distinct_count_measure() {
        // customer_count counts the customer_id fact column; mapping that
        // foreign key makes its aggregate column carry the measure too.
        let star = sales_star(true);
        let mut foreign_keys = HashMap::new();
        foreign_keys.insert("customer_id".to_string(), "cust_key".to_string());
        let def = def_with(TableMappings {
            foreign_keys,
            measures: vec![MeasureMapping {
                measure_name: "unit_sales".to_string(),
                column: "us".to_string(),
            }],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("cust_key", SqlType::Integer),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, _) = check(&star, &def, &mut table);
        assert!(accepted);

        let col = table.column("cust_key").unwrap();
        assert!(col.has_usage(UsageKind::ForeignKey));
        assert!(col.usages().iter().any(|u| matches!(
            u,
            ColumnUsage::Measure { name, .. } if name == "customer_count"
        )));
    }

    #[test]
    fn test_rider_skipped_when_measure_already_mapped() {
        let star = sales_star(true);
        let mut foreign_keys = HashMap::new();
        foreign_keys.insert("customer_id".to_string(), "cust_key".to_string());
        let def = def_with(TableMappings {
            foreign_keys,
            measures: vec![
                MeasureMapping {
                    measure_name: "unit_sales".to_string(),
                    column: "us".to_string(),
                },
                MeasureMapping {
                    measure_name: "customer_count".to_string(),
                    column: "cc".to_string(),
                },
            ],
            ..TableMappings::default()
        });
        let mut table = candidate(
            "agg_custom",
            &[
                ("cust_key", SqlType::Integer),
                ("cc", SqlType::Integer),
                ("fact_count", SqlType::Integer),
                ("us", SqlType::Decimal),
            ],
        );

        let (accepted, _) = check(&star, &def, &mut table);
        assert!(accepted);

        // The explicit mapping won; the FK column carries no rider.
        assert!(!table
            .column("cust_key")
            .unwrap()
            .has_usage(UsageKind::Measure));
        assert!(table.column("cc").unwrap().has_usage(UsageKind::Measure));
    }
}

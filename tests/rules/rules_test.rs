#[cfg(test)]
mod tests {
    use aggmatch::recorder::MsgRecorder;
    use aggmatch::rules::{
        AggRuleGroup, ExcludeRule, LevelMapping, MeasureMapping, NameMatcher, NameTableDef,
        PatternTableDef, TableDef, TableMappings,
    };
    use aggmatch::star::{
        Aggregator, DimTarget, Star, StarDimension, StarHierarchy, StarLevel, StarMeasure,
        StarTable,
    };
    use std::collections::HashMap;

    fn sales_star() -> Star {
        Star {
            name: "sales".to_string(),
            fact: StarTable {
                alias: "sales_fact".to_string(),
                relation: "sales_fact".to_string(),
                join: None,
                columns: vec![],
                children: vec![],
            },
            measures: vec![StarMeasure {
                name: "unit_sales".to_string(),
                aggregator: Aggregator::Sum,
                bit_position: 0,
                column_name: "amount".to_string(),
                counted_bit: None,
            }],
            dimensions: vec![StarDimension {
                name: "product".to_string(),
                foreign_key: "product_id".to_string(),
                target: DimTarget::Table {
                    alias: "product".to_string(),
                },
                hierarchies: vec![StarHierarchy {
                    name: "product".to_string(),
                    levels: vec![StarLevel {
                        name: "Category".to_string(),
                        depth: 1,
                        column_bit: 1,
                        column_name: "category".to_string(),
                        unique_members: true,
                        usage_prefix: None,
                    }],
                }],
            }],
            column_count: 2,
        }
    }

    fn name_def(name: &str, mappings: TableMappings) -> TableDef {
        TableDef::Name(NameTableDef {
            name: name.to_string(),
            ignore_case: true,
            approx_rows: None,
            mappings,
        })
    }

    #[test]
    fn test_name_definition_overrides_pattern_mappings() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(TableDef::Pattern(
            PatternTableDef::new(
                "agg_.*",
                true,
                vec![],
                TableMappings {
                    measures: vec![MeasureMapping {
                        measure_name: "unit_sales".to_string(),
                        column: "generic_sum".to_string(),
                    }],
                    ..TableMappings::default()
                },
            )
            .unwrap(),
        ));
        group.tables.push(name_def(
            "agg_special",
            TableMappings {
                measures: vec![MeasureMapping {
                    measure_name: "unit_sales".to_string(),
                    column: "special_sum".to_string(),
                }],
                ..TableMappings::default()
            },
        ));

        // The exact name wins even though the pattern also matches, and
        // regardless of declaration order.
        let def = group.match_table("AGG_SPECIAL").unwrap();
        assert_eq!(def.mappings().measures[0].column, "special_sum");
        let def = group.match_table("agg_other").unwrap();
        assert_eq!(def.mappings().measures[0].column, "generic_sum");
    }

    #[test]
    fn test_group_exclusion_beats_every_definition() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.excludes.push(ExcludeRule::new(
            NameMatcher::pattern("agg_tmp_.*", true).unwrap(),
        ));
        group.tables.push(name_def(
            "agg_tmp_category",
            TableMappings::default(),
        ));

        assert!(group.is_excluded("agg_tmp_category"));
        assert!(group.match_table("agg_tmp_category").is_none());
        assert!(!group.is_excluded("agg_category"));
    }

    #[test]
    fn test_pattern_nested_excludes_reject() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(TableDef::Pattern(
            PatternTableDef::new(
                "agg_.*",
                true,
                vec![ExcludeRule::new(
                    NameMatcher::exact("agg_scratch", true),
                )],
                TableMappings::default(),
            )
            .unwrap(),
        ));

        assert!(group.match_table("agg_category").is_some());
        assert!(group.match_table("agg_scratch").is_none());
    }

    #[test]
    fn test_validate_flags_unknown_foreign_key() {
        let mut foreign_keys = HashMap::new();
        foreign_keys.insert("store_id".to_string(), "store_key".to_string());
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(name_def(
            "agg_x",
            TableMappings {
                foreign_keys,
                ..TableMappings::default()
            },
        ));

        let mut recorder = MsgRecorder::new(10);
        group.validate(&sales_star(), &mut recorder).unwrap();
        assert!(recorder
            .errors()
            .iter()
            .any(|e| e.contains("store_id") && e.contains("no join condition")));
    }

    #[test]
    fn test_validate_flags_duplicate_mappings() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(name_def(
            "agg_x",
            TableMappings {
                levels: vec![
                    LevelMapping {
                        level_name: "Category".to_string(),
                        column: "cat".to_string(),
                        collapsed: None,
                    },
                    LevelMapping {
                        level_name: "Category".to_string(),
                        column: "cat2".to_string(),
                        collapsed: None,
                    },
                ],
                measures: vec![
                    MeasureMapping {
                        measure_name: "unit_sales".to_string(),
                        column: "us".to_string(),
                    },
                    MeasureMapping {
                        measure_name: "store_sales".to_string(),
                        column: "us".to_string(),
                    },
                ],
                ..TableMappings::default()
            },
        ));

        let mut recorder = MsgRecorder::new(10);
        group.validate(&sales_star(), &mut recorder).unwrap();
        assert!(recorder
            .errors()
            .iter()
            .any(|e| e.contains("duplicate level name 'Category'")));
        assert!(recorder
            .errors()
            .iter()
            .any(|e| e.contains("duplicate measure column 'us'")));
    }

    #[test]
    fn test_validate_flags_unresolvable_level_and_measure_names() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(name_def(
            "agg_x",
            TableMappings {
                levels: vec![
                    LevelMapping {
                        level_name: "Category".to_string(),
                        column: "cat".to_string(),
                        collapsed: None,
                    },
                    LevelMapping {
                        level_name: "NoSuchLevel".to_string(),
                        column: "mystery".to_string(),
                        collapsed: None,
                    },
                ],
                measures: vec![
                    MeasureMapping {
                        measure_name: "unit_sales".to_string(),
                        column: "us".to_string(),
                    },
                    MeasureMapping {
                        measure_name: "no_such_measure".to_string(),
                        column: "nsm".to_string(),
                    },
                ],
                ..TableMappings::default()
            },
        ));

        let mut recorder = MsgRecorder::new(10);
        group.validate(&sales_star(), &mut recorder).unwrap();

        // Only the two typo'd names are flagged; the resolvable ones pass.
        assert_eq!(recorder.error_count(), 2);
        assert!(recorder
            .errors()
            .iter()
            .any(|e| e.contains("level 'NoSuchLevel' does not exist")));
        assert!(recorder
            .errors()
            .iter()
            .any(|e| e.contains("measure 'no_such_measure' does not exist")));
    }

    #[test]
    fn test_validate_frames_messages_with_definition() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(name_def(
            "agg_x",
            TableMappings {
                fact_count_column: Some(String::new()),
                ..TableMappings::default()
            },
        ));

        let mut recorder = MsgRecorder::new(10);
        group.validate(&sales_star(), &mut recorder).unwrap();
        assert!(recorder.errors()[0].contains("rules[sales_fact]"));
        assert!(recorder.errors()[0].contains("agg_x"));
    }

    #[test]
    fn test_case_sensitivity_is_per_definition() {
        let mut group = AggRuleGroup::new("sales_fact");
        group.tables.push(TableDef::Name(NameTableDef {
            name: "agg_exact".to_string(),
            ignore_case: false,
            approx_rows: None,
            mappings: TableMappings::default(),
        }));

        assert!(group.match_table("agg_exact").is_some());
        assert!(group.match_table("AGG_EXACT").is_none());
    }
}

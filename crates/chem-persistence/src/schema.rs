// Diesel schema compartido por SQLite y Postgres.
// Nivel de archivo: archive_source, archive_entity, archive_entity_source
// Nivel de workbench: workbench_entity, workbench_entity_archive,
// workbench_reaction_compound, workbench_reaction_pattern_link,
// workbench_reaction_pattern_compound, workbench_compound_structure_pattern
// Bookkeeping: archive_migration_failure, workbench_extraction
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    archive_source (id) {
        id -> BigInt,
        name -> Text,
        version -> Text,
        file_name -> Text,
        created_at_ts -> BigInt,
        created_by -> Text,
    }
}
diesel::table! {
    archive_entity (id) {
        id -> BigInt,
        kind -> Text,
        identifier -> Text,
        identifier_key -> Text,
        properties -> Nullable<Text>,
        created_at_ts -> BigInt,
        created_by -> Text,
    }
}
diesel::table! {
    archive_entity_source (archive_id, source_id) {
        archive_id -> BigInt,
        source_id -> BigInt,
        created_at_ts -> BigInt,
        created_by -> Text,
    }
}
diesel::table! {
    workbench_entity (id) {
        id -> BigInt,
        kind -> Text,
        identifier -> Text,
        identifier_key -> Text,
        is_building_block -> Bool,
        created_at_ts -> BigInt,
        created_by -> Text,
        updated_at_ts -> Nullable<BigInt>,
        updated_by -> Nullable<Text>,
    }
}
diesel::table! {
    workbench_entity_archive (workbench_id, archive_id) {
        workbench_id -> BigInt,
        archive_id -> BigInt,
        created_at_ts -> BigInt,
        created_by -> Text,
    }
}
diesel::table! {
    workbench_reaction_compound (reaction_id, role, position) {
        reaction_id -> BigInt,
        role -> Text,
        position -> Integer,
        compound_id -> BigInt,
    }
}
diesel::table! {
    workbench_reaction_pattern_link (reaction_id, pattern_id) {
        reaction_id -> BigInt,
        pattern_id -> BigInt,
        created_at_ts -> BigInt,
        created_by -> Text,
    }
}
diesel::table! {
    workbench_reaction_pattern_compound (pattern_id, role, position) {
        pattern_id -> BigInt,
        role -> Text,
        position -> Integer,
        compound_pattern_id -> BigInt,
    }
}
diesel::table! {
    workbench_compound_structure_pattern (compound_id, pattern_id) {
        compound_id -> BigInt,
        pattern_id -> BigInt,
        created_at_ts -> BigInt,
        created_by -> Text,
    }
}
diesel::table! {
    archive_migration_failure (archive_id) {
        archive_id -> BigInt,
        kind -> Text,
        reason -> Text,
        detail -> Text,
        attempts -> Integer,
        last_attempt_ts -> BigInt,
    }
}
diesel::table! {
    workbench_extraction (entity_id) {
        entity_id -> BigInt,
        succeeded -> Bool,
        detail -> Nullable<Text>,
        attempted_at_ts -> BigInt,
        attempted_by -> Text,
    }
}
allow_tables_to_appear_in_same_query!(archive_source,
                                      archive_entity,
                                      archive_entity_source,
                                      archive_migration_failure,
                                      workbench_entity,
                                      workbench_entity_archive,
                                      workbench_reaction_compound,
                                      workbench_reaction_pattern_link,
                                      workbench_reaction_pattern_compound,
                                      workbench_compound_structure_pattern,
                                      workbench_extraction);

// Table definitions for the SQLite index store. The tables are created at
// open time by `store::SqliteStore`, see `CREATE_TABLES`.

diesel::table! {
    indexed_vectors (id) {
        id -> Text,
        text -> Text,
        metadata -> Text,
        source -> Nullable<Text>,
        timestamp -> Nullable<Text>,
        vector -> Nullable<Binary>,
    }
}

diesel::table! {
    index_meta (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(indexed_vectors, index_meta,);

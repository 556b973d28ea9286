table! {
    users (id) {
        id -> Integer,
        email -> Text,
        password -> Text,
    }
}

table! {
    session (token) {
        token -> Text,
        user_id -> Integer,
        created_at -> Timestamp,
        expires_at -> Timestamp,
    }
}

table! {
    file (id) {
        id -> Integer,
        user_id -> Integer,
        name -> Text,
        kind -> Text,
        is_public -> Bool,
        parent_id -> Nullable<Integer>,
        local_path -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

joinable!(session -> users (user_id));
joinable!(file -> users (user_id));

allow_tables_to_appear_in_same_query!(
    users,
    session,
    file,
);

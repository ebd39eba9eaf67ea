table! {
    users (id) {
        id -> Int4,
        email -> Varchar,
        name -> Varchar,
    }
}

table! {
    workspaces (id) {
        id -> Int4,
        owner -> Int4,
        top_node -> Nullable<Int4>,
        top_archive_ref -> Varchar,
        created -> Timestamp,
        modified -> Timestamp,
        status -> crate::db::types::Workspace_status,
        message -> Nullable<Varchar>,
        crawl_id -> Nullable<Varchar>,
        expires -> Nullable<Timestamp>,
    }
}

table! {
    workspace_nodes (id) {
        id -> Int4,
        workspace -> Int4,
        archive_ref -> Nullable<Varchar>,
        archive_location -> Nullable<Varchar>,
        staging_location -> Nullable<Varchar>,
        origin_location -> Nullable<Varchar>,
        name -> Varchar,
        kind -> crate::db::types::Node_kind,
        mime -> Nullable<Varchar>,
        status -> crate::db::types::Node_status,
        pid -> Nullable<Varchar>,
        archivable -> Bool,
    }
}

table! {
    workspace_node_links (parent, child) {
        parent -> Int4,
        child -> Int4,
        reference -> Varchar,
    }
}

table! {
    workspace_node_replacements (old_node) {
        old_node -> Int4,
        new_node -> Int4,
    }
}

joinable!(workspaces -> users (owner));
joinable!(workspace_nodes -> workspaces (workspace));

allow_tables_to_appear_in_same_query!(
    users,
    workspaces,
    workspace_nodes,
    workspace_node_links,
    workspace_node_replacements,
);

//! Diesel schema, maintained by hand. Replaceable with `diesel print-schema`.

diesel::table! {
    blueprints (id) {
        id -> Text,
        plan -> Jsonb,
        source -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    deployments (id) {
        id -> Text,
        blueprint_id -> Text,
        plan -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    nodes (id, deployment_id) {
        id -> Text,
        deployment_id -> Text,
        blueprint_id -> Text,
        node_type -> Text,
        type_hierarchy -> Jsonb,
        number_of_instances -> Int4,
        host_id -> Nullable<Text>,
        properties -> Jsonb,
        operations -> Jsonb,
        plugins -> Jsonb,
        plugins_to_install -> Nullable<Jsonb>,
        relationships -> Jsonb,
    }
}

diesel::table! {
    node_instances (id) {
        id -> Text,
        node_id -> Text,
        deployment_id -> Text,
        host_id -> Nullable<Text>,
        relationships -> Jsonb,
        state -> Text,
        runtime_properties -> Nullable<Jsonb>,
        version -> Nullable<Int4>,
    }
}

diesel::table! {
    executions (id) {
        id -> Text,
        status -> Text,
        created_at -> Timestamptz,
        blueprint_id -> Text,
        workflow_id -> Text,
        deployment_id -> Text,
        internal_workflow_id -> Nullable<Text>,
        error -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(blueprints, deployments, nodes, node_instances, executions,);

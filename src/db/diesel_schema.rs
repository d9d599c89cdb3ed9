// Diesel table definitions. Keep in sync with schema.rs.

diesel::table! {
    users (id) {
        id -> Text,
        username -> Text,
        email -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    friends (id) {
        id -> Text,
        requester_id -> Text,
        addressee_id -> Text,
        status -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    goals (id) {
        id -> Text,
        user_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        milestone_type -> Text,
        milestone_interval_days -> Nullable<Integer>,
        milestone_quantity -> Nullable<Integer>,
        milestone_unit -> Nullable<Text>,
        start_date -> Text,
        deadline -> Text,
        privacy_setting -> Text,
        image_url -> Nullable<Text>,
        user_story -> Nullable<Text>,
        status -> Text,
        is_completed -> Integer,
        completed_at -> Nullable<Text>,
        failure_reason -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    goal_allowed_viewers (goal_id, user_id) {
        goal_id -> Text,
        user_id -> Text,
        can_verify -> Integer,
    }
}

diesel::table! {
    milestones (id) {
        id -> Text,
        goal_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        is_flexible -> Integer,
        batch_number -> Integer,
        order_index -> Integer,
        due_date -> Nullable<Text>,
        completed -> Integer,
        failed -> Integer,
        progress -> Integer,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    proofs (id) {
        id -> Text,
        goal_id -> Text,
        milestone_id -> Nullable<Text>,
        user_id -> Text,
        image_url -> Text,
        caption -> Nullable<Text>,
        status -> Text,
        required_verifications -> Integer,
        uploaded_at -> Text,
        verification_expires_at -> Text,
    }
}

diesel::table! {
    proof_verifications (id) {
        id -> Text,
        proof_id -> Text,
        verifier_id -> Text,
        approved -> Integer,
        comment -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    notifications (id) {
        id -> Text,
        recipient_id -> Text,
        actor_id -> Nullable<Text>,
        notification_type -> Text,
        goal_id -> Nullable<Text>,
        proof_id -> Nullable<Text>,
        message -> Text,
        status -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    interval_change_requests (id) {
        id -> Text,
        goal_id -> Text,
        requester_id -> Text,
        current_interval -> Integer,
        requested_interval -> Integer,
        status -> Text,
        created_at -> Text,
        resolved_at -> Nullable<Text>,
        resolved_by -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    friends,
    goals,
    goal_allowed_viewers,
    milestones,
    proofs,
    proof_verifications,
    notifications,
    interval_change_requests,
);

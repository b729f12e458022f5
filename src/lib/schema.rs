table! {
    balances (token, account) {
        token -> Text,
        account -> Text,
        block -> Int8,
        liquid_balance -> Int8,
        rex_stake -> Int8,
        resource_stake -> Int8,
        total_balance -> Int8,
    }
}

table! {
    delegations (from_account, to_account) {
        from_account -> Text,
        to_account -> Text,
        cpu -> Int8,
        net -> Int8,
        block -> Int8,
    }
}

table! {
    producer_snapshot (id) {
        id -> Int8,
        date -> Timestamptz,
        snapshot -> Jsonb,
    }
}

table! {
    sync_status (poller, action) {
        poller -> Text,
        action -> Text,
        block -> Int8,
    }
}

table! {
    tokens (id) {
        id -> Text,
        supply -> Nullable<Text>,
        last_block -> Int8,
    }
}

table! {
    voters (voter) {
        voter -> Text,
        producers -> Array<Text>,
        vote_weight -> Numeric,
        last_block -> Int8,
    }
}

allow_tables_to_appear_in_same_query!(
    balances,
    delegations,
    producer_snapshot,
    sync_status,
    tokens,
    voters,
);

use crate::schema::delegations;

#[derive(Clone, Debug, PartialEq, Eq, Queryable, Insertable)]
#[table_name = "delegations"]
pub struct Delegation {
    pub from_account: String,
    pub to_account: String,
    pub cpu: i64,
    pub net: i64,
    pub block: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelegationChange {
    Update(Delegation),
    Delete,
}

/// Subtracts an undelegation from an existing row. Components are clamped
/// at zero; the row survives while either component is non-zero.
pub fn decrement(existing: &Delegation, cpu: i64, net: i64, block: i64) -> DelegationChange {
    let cpu = (existing.cpu - cpu).max(0);
    let net = (existing.net - net).max(0);

    if cpu != 0 || net != 0 {
        DelegationChange::Update(Delegation {
            from_account: existing.from_account.clone(),
            to_account: existing.to_account.clone(),
            cpu,
            net,
            block,
        })
    } else {
        DelegationChange::Delete
    }
}

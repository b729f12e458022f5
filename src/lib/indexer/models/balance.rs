use crate::schema::balances;

#[derive(Clone, Debug, PartialEq, Eq, Queryable, Insertable)]
#[table_name = "balances"]
pub struct Balance {
    pub token: String,
    pub account: String,
    pub block: i64,
    pub liquid_balance: i64,
    pub rex_stake: i64,
    pub resource_stake: i64,
    pub total_balance: i64,
}

impl Balance {
    pub fn new(token: impl Into<String>, account: impl Into<String>, block: i64) -> Self {
        Self {
            token: token.into(),
            account: account.into(),
            block,
            liquid_balance: 0,
            rex_stake: 0,
            resource_stake: 0,
            total_balance: 0,
        }
    }

    pub fn component(&self, component: BalanceComponent) -> i64 {
        match component {
            BalanceComponent::Liquid => self.liquid_balance,
            BalanceComponent::Rex => self.rex_stake,
            BalanceComponent::Resource => self.resource_stake,
        }
    }

    /// Sets one component and recomputes the total from all three.
    pub fn set_component(&mut self, component: BalanceComponent, amount: i64) {
        match component {
            BalanceComponent::Liquid => self.liquid_balance = amount,
            BalanceComponent::Rex => self.rex_stake = amount,
            BalanceComponent::Resource => self.resource_stake = amount,
        }
        self.total_balance = self.liquid_balance + self.rex_stake + self.resource_stake;
    }

    pub fn is_empty(&self) -> bool {
        self.liquid_balance == 0 && self.rex_stake == 0 && self.resource_stake == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BalanceComponent {
    Liquid,
    Rex,
    Resource,
}

impl BalanceComponent {
    pub fn column(&self) -> &'static str {
        match self {
            BalanceComponent::Liquid => "liquid_balance",
            BalanceComponent::Rex => "rex_stake",
            BalanceComponent::Resource => "resource_stake",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BalanceUpdate {
    pub token: String,
    pub account: String,
    pub component: BalanceComponent,
    pub amount: i64,
    pub block: i64,
}

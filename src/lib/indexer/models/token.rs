use crate::schema::tokens;

#[derive(Clone, Debug, PartialEq, Eq, Queryable, Insertable)]
#[table_name = "tokens"]
pub struct TokenRow {
    pub id: String,
    pub supply: Option<String>,
    pub last_block: i64,
}

use bigdecimal::BigDecimal;

#[derive(Clone, Debug, PartialEq)]
pub struct Voter {
    pub voter: String,
    pub producers: Vec<String>,
    pub vote_weight: BigDecimal,
    pub last_block: i64,
}

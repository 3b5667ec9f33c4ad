pub mod claims;
pub mod health;
pub mod jobs;

#[cfg(test)]
mod test_state;

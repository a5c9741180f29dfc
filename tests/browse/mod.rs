mod crud;
mod export;
mod query;

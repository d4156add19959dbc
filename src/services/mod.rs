pub mod splendid;

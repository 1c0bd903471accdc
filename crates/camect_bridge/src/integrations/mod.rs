pub mod camect;

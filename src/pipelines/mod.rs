pub mod dada2;

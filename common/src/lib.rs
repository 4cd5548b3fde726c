pub mod macros;

agg_mod![db, models, telegram, utils];

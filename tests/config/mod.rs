mod config_loading_test;

mod handover_test;
